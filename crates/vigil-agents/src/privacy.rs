use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use vigil_protocol::{Event, Payload, PiiFinding, PiiKind, PrivacyViolation};
use vigil_topics as topics;

use crate::{wrong_payload, Agent, AgentError};

/// Fixed pattern set, ordered longest-match-class first so a card number
/// is never partially consumed by the shorter digit patterns.
static PATTERNS: Lazy<Vec<(PiiKind, Regex)>> = Lazy::new(|| {
    vec![
        (
            PiiKind::Email,
            Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("email regex"),
        ),
        // 13-19 digits, optionally space/dash separated
        (
            PiiKind::CardNumber,
            Regex::new(r"\b\d(?:[ -]?\d){12,18}\b").expect("card regex"),
        ),
        // AU format: leading 0 or +61, then 8-9 more digits
        (
            PiiKind::Phone,
            Regex::new(r"(?:\+61|\b0)[ -]?\d(?:[ -]?\d){7,8}\b").expect("phone regex"),
        ),
        // tax file number: nine digits, usually grouped in threes
        (
            PiiKind::TaxFileNumber,
            Regex::new(r"\b\d{3}[ -]?\d{3}[ -]?\d{3}\b").expect("tfn regex"),
        ),
    ]
});

/// Scan one log line. Returns the sanitized copy (typed placeholders in
/// place of each match) and the findings; the original line is untouched.
/// Offsets refer to the working string at detection time and never carry
/// the matched text itself.
pub fn scan_line(line: &str) -> (String, Vec<PiiFinding>) {
    let mut sanitized = line.to_string();
    let mut findings = Vec::new();
    for (kind, pattern) in PATTERNS.iter() {
        loop {
            let range = match pattern.find(&sanitized) {
                Some(found) => found.range(),
                None => break,
            };
            findings.push(PiiFinding {
                pii_kind: *kind,
                offset: range.start,
            });
            sanitized.replace_range(range, kind.placeholder());
        }
    }
    (sanitized, findings)
}

/// Watches `log.line` for PII leaks. Publishes violations with a sanitized
/// copy; never mutates the original stream.
pub struct PrivacyAgent;

#[async_trait]
impl Agent for PrivacyAgent {
    fn name(&self) -> &'static str {
        "privacy-agent"
    }

    fn topics(&self) -> &'static [&'static str] {
        &[topics::TOPIC_LOG_LINE]
    }

    async fn handle(&self, event: &Event) -> Result<Vec<Event>, AgentError> {
        let Payload::LogLine(log) = &event.payload else {
            return Err(wrong_payload(self.name(), event));
        };
        let (sanitized_line, findings) = scan_line(&log.line);
        if findings.is_empty() {
            return Ok(vec![]);
        }
        Ok(vec![Event::new(
            event.correlation_id.clone(),
            self.name(),
            Payload::PrivacyViolation(PrivacyViolation {
                source_component: log.source_component.clone(),
                findings,
                sanitized_line,
            }),
        )])
    }
}
