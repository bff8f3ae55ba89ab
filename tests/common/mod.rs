pub fn message(from: &str, to: &str, subject: &str, date: &str, body: &str) -> Vec<u8> {
  format!("From: {from}\r\nTo: {to}\r\nSubject: {subject}\r\nDate: {date}\r\n\r\n{body}").into_bytes()
}

pub fn append(mailbox: &mut gumdrop_mailbox::Mailbox, data: &[u8]) -> gumdrop_mailbox::Result<u64> {
  mailbox.start_append_message(Default::default(), Vec::new(), None)?;
  mailbox.append_message_content(data)?;
  mailbox.end_append_message()
}
