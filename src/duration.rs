/// Renders a duration as `45s`, `3m 20s` or `2h 5m`.
pub fn format_duration(seconds: i64) -> String {
  let seconds = seconds.max(0);
  if seconds < 60 {
    return format!("{}s", seconds);
  }

  let minutes = seconds / 60;
  let secs = seconds % 60;
  if minutes < 60 {
    return format!("{}m {}s", minutes, secs);
  }

  format!("{}h {}m", minutes / 60, minutes % 60)
}
