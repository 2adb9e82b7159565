use std::collections::HashSet;

use crate::models::CalendarEvent;

/// Decides whether a calendar event belongs to the tracked project.
#[derive(Debug, Clone)]
pub struct RelevanceFilter {
    keywords: Vec<String>,
}

impl RelevanceFilter {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keywords }
    }

    /// Plain case-insensitive substring match; "cinder" matches "cinderblock".
    pub fn matches_keyword(&self, event: &CalendarEvent) -> bool {
        if self.keywords.is_empty() {
            return false;
        }
        let text = format!(
            "{} {}",
            event.summary.as_deref().unwrap_or_default(),
            event.description.as_deref().unwrap_or_default()
        )
        .to_lowercase();
        self.keywords.iter().any(|kw| text.contains(kw.as_str()))
    }

    pub fn has_known_attendee(event: &CalendarEvent, known_emails: &HashSet<String>) -> bool {
        event
            .attendees
            .iter()
            .any(|a| known_emails.contains(&a.email.trim().to_lowercase()))
    }

    pub fn is_relevant(&self, event: &CalendarEvent, known_emails: &HashSet<String>) -> bool {
        self.matches_keyword(event) || Self::has_known_attendee(event, known_emails)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventAttendee;

    fn event(title: &str, description: Option<&str>, attendees: &[&str]) -> CalendarEvent {
        CalendarEvent {
            id: "e1".to_string(),
            summary: Some(title.to_string()),
            description: description.map(str::to_string),
            start: None,
            attendees: attendees
                .iter()
                .map(|email| EventAttendee {
                    email: email.to_string(),
                    display_name: None,
                })
                .collect(),
        }
    }

    fn known(emails: &[&str]) -> HashSet<String> {
        emails.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn keyword_in_title_is_relevant() {
        let filter = RelevanceFilter::new(["cinderella"]);
        let ev = event("Cinderella sync", None, &["stranger@z.com"]);
        assert!(filter.is_relevant(&ev, &known(&["jane@x.com"])));
    }

    #[test]
    fn keyword_in_description_is_relevant() {
        let filter = RelevanceFilter::new(["Cinderella"]);
        let ev = event("Weekly", Some("agenda: CINDERELLA diligence"), &[]);
        assert!(filter.is_relevant(&ev, &HashSet::new()));
    }

    #[test]
    fn known_attendee_without_keyword_is_relevant() {
        let filter = RelevanceFilter::new(["cinderella"]);
        let ev = event("Coffee", None, &["Jane@X.com"]);
        assert!(filter.is_relevant(&ev, &known(&["jane@x.com"])));
    }

    #[test]
    fn neither_keyword_nor_attendee_is_excluded() {
        let filter = RelevanceFilter::new(["cinderella"]);
        let ev = event("Dentist", Some("cleaning"), &["dr@teeth.com"]);
        assert!(!filter.is_relevant(&ev, &known(&["jane@x.com"])));
    }

    #[test]
    fn substring_matches_are_kept() {
        let filter = RelevanceFilter::new(["cinder"]);
        assert!(filter.matches_keyword(&event("Cinderblock delivery", None, &[])));
    }

    #[test]
    fn blank_keywords_never_match() {
        let filter = RelevanceFilter::new(["", "  "]);
        assert!(!filter.matches_keyword(&event("anything", Some("at all"), &[])));
    }

    #[test]
    fn missing_title_and_description_are_tolerated() {
        let filter = RelevanceFilter::new(["cinderella"]);
        let ev = CalendarEvent::default();
        assert!(!filter.is_relevant(&ev, &HashSet::new()));
    }
}
