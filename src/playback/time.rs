/// Format seconds as `MM:SS`.
///
/// Minutes are not wrapped into hours, so an hour reads `60:00`. Fractions are
/// truncated and non-finite or negative input reads `00:00`.
pub fn format_time(seconds: f64) -> String {
    if !seconds.is_finite() || seconds <= 0.0 {
        return "00:00".to_string();
    }

    let whole = seconds.floor() as u64;
    format!("{:02}:{:02}", whole / 60, whole % 60)
}
