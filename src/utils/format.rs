use chrono::{DateTime, Local, Locale, TimeZone, Utc};

/// Format a timestamp as a date in the local timezone, laid out the way `locale` writes dates.
pub fn format_display_date(when: DateTime<Utc>, locale: Locale) -> String {
    format_date_in(when, &Local, locale)
}

pub fn format_date_in<Tz: TimeZone>(when: DateTime<Utc>, tz: &Tz, locale: Locale) -> String
where
    Tz::Offset: std::fmt::Display,
{
    when.with_timezone(tz)
        .format_localized("%x", locale)
        .to_string()
}

/// Escape text for inclusion in info window markup.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_date_in_the_locale_layout() {
        let when = DateTime::<Utc>::from_timestamp_millis(1_470_000_000_000).unwrap();
        assert_eq!(format_date_in(when, &Utc, Locale::en_US), "07/31/2016");
        assert_eq!(format_date_in(when, &Utc, Locale::de_DE), "31.07.2016");
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(escape_html("<b>Mr. Mime</b>"), "&lt;b&gt;Mr. Mime&lt;/b&gt;");
        assert_eq!(escape_html("Farfetch'd"), "Farfetch&#39;d");
    }
}
