//! Rider-facing heart rate warning content

use crate::ride_core::anomaly::HeartRateAlert;

pub const ALERT_SUBJECT: &str = "Important Message: Heart rate alert";

pub const ALERT_TEXT: &str =
    "Your heart rate was picked up at an abnormal rhythm, please seek medical attention!";

/// Render the HTML warning body.
///
/// The healthy range is printed upper bound first, matching the warning
/// riders already receive.
pub fn render_alert_html(alert: &HeartRateAlert) -> String {
    format!(
        r#"<html>
<head></head>
<body align="center">
    <h1>Warning!</h1>
    <p> {name} You may need to seek medical attention </p>
    <p> Your heart rate was recorded as {heart_rate} BPM </p>
    <p> This is out of range for what is regarded as a healthy heart rate for your age &amp; weight; </p>
    <p> Healthy BPM range: {upper} - {lower} </p>
</body>
</html>"#,
        name = escape_html(&alert.name),
        heart_rate = alert.heart_rate,
        upper = alert.band.upper,
        lower = alert.band.lower,
    )
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
