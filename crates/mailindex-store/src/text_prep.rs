use mailindex_core::config::embedding::{EMAIL_BODY_MAX_WORDS, MEMORY_CONTENT_MAX_WORDS};

/// Builds the embedding input for an email: subject twice, sender, recipients,
/// then the leading words of the body.
pub fn prepare_email_text(subject: &str, from: &str, to: &str, body: &str) -> String {
    let subject = subject.trim();
    let from = from.trim();
    let to = to.trim();

    let mut header = Vec::with_capacity(4);
    if !subject.is_empty() {
        header.push(format!("Subject: {subject}"));
        header.push(format!("Subject: {subject}"));
    }
    if !from.is_empty() {
        header.push(format!("From: {from}"));
    }
    if !to.is_empty() {
        header.push(format!("To: {to}"));
    }
    let header = header.join("\n");
    let body = truncate_words(body, EMAIL_BODY_MAX_WORDS);

    match (header.is_empty(), body.is_empty()) {
        (_, true) => header,
        (true, false) => body,
        (false, false) => format!("{header}\n\n{body}"),
    }
}

/// Builds the embedding input for a memory entry as `role: content`.
pub fn prepare_memory_text(role: &str, content: &str) -> String {
    let role = role.trim();
    let content = truncate_words(content, MEMORY_CONTENT_MAX_WORDS);
    if role.is_empty() {
        content
    } else {
        format!("{role}: {content}")
    }
}

fn truncate_words(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_prepare_email_text_repeats_subject_and_joins_headers() {
        let text = prepare_email_text("Quarterly report", "alice@example.com", "bob@example.com", "See attached.");
        assert_eq!(
            text,
            "Subject: Quarterly report\nSubject: Quarterly report\nFrom: alice@example.com\nTo: bob@example.com\n\nSee attached."
        );
    }

    #[test]
    fn unit_prepare_email_text_truncates_body_words() {
        let body = (0..400).map(|index| format!("w{index}")).collect::<Vec<_>>().join(" ");
        let text = prepare_email_text("", "", "", &body);
        assert_eq!(text.split_whitespace().count(), EMAIL_BODY_MAX_WORDS);
        assert!(text.ends_with("w149"));
    }

    #[test]
    fn unit_prepare_memory_text_prefixes_role() {
        assert_eq!(prepare_memory_text("user", "  hello   there "), "user: hello there");
        assert_eq!(prepare_memory_text(" ", "just content"), "just content");
    }
}
