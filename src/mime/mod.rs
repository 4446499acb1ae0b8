use mailparse::{DispositionType, MailHeader, MailHeaderMap, ParsedMail};

use crate::classify::Classifier;
use crate::errors::{AppError, AppResult};
use crate::types::{MessageDetail, MessageSummary, Uid};

/// Builds a summary from an `RFC822.HEADER` payload. Encoded words in the
/// subject are decoded using their declared charset; undeclared bytes are
/// read as UTF-8.
pub fn parse_summary(uid: Uid, header_bytes: &[u8], classifier: &Classifier) -> AppResult<MessageSummary> {
    let (headers, _) = mailparse::parse_headers(header_bytes)
        .map_err(|e| AppError::Parse(format!("headers of UID {uid}: {e}")))?;
    let subject = header_value(&headers, "Subject");
    let classification = classifier.classify(&subject);

    Ok(MessageSummary {
        id: uid.to_string(),
        date: header_value(&headers, "Date"),
        from: header_value(&headers, "From"),
        urgent: classification.urgent,
        sku: classification.sku,
        subject,
    })
}

/// Builds a detail record from a full `RFC822` payload. A body that cannot
/// be decoded yields an empty string; the headers are still returned.
pub fn parse_detail(uid: Uid, raw: &[u8]) -> AppResult<MessageDetail> {
    let parsed = mailparse::parse_mail(raw)
        .map_err(|e| AppError::Parse(format!("MIME structure of UID {uid}: {e}")))?;
    let headers = &parsed.headers;

    Ok(MessageDetail {
        id: uid.to_string(),
        subject: header_value(headers, "Subject"),
        from: header_value(headers, "From"),
        to: header_value(headers, "To"),
        date: header_value(headers, "Date"),
        body: extract_plain_body(&parsed),
    })
}

/// First inline `text/plain` part in depth-first order for multipart
/// messages, otherwise the single payload whatever its type.
pub fn extract_plain_body(parsed: &ParsedMail) -> String {
    let part = if parsed.subparts.is_empty() {
        Some(parsed)
    } else {
        find_inline_plain(parsed)
    };

    part.and_then(|p| p.get_body().ok()).unwrap_or_default()
}

fn find_inline_plain<'a, 'b>(part: &'b ParsedMail<'a>) -> Option<&'b ParsedMail<'a>> {
    if part.subparts.is_empty() {
        let is_plain = part.ctype.mimetype.eq_ignore_ascii_case("text/plain");
        let is_attachment =
            part.get_content_disposition().disposition == DispositionType::Attachment;
        return (is_plain && !is_attachment).then_some(part);
    }

    part.subparts.iter().find_map(find_inline_plain)
}

fn header_value(headers: &[MailHeader], name: &str) -> String {
    headers.get_first_value(name).unwrap_or_default()
}
