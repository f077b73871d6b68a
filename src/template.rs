use std::collections::HashMap;

use crate::models::{
    channel::ChannelType,
    delivery::{DeliveryTarget, RenderedMessage},
    event::EventType,
};

const EMAIL_SHELL: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{{Subject}}</title>
</head>
<body style="margin:0;padding:0;background-color:#f4f5f7;font-family:Arial,Helvetica,sans-serif;">
<table role="presentation" width="100%" cellspacing="0" cellpadding="0">
<tr>
<td align="center" style="padding:24px;">
<table role="presentation" width="600" cellspacing="0" cellpadding="0" style="background-color:#ffffff;border-radius:6px;">
<tr><td style="padding:24px 32px;font-size:20px;font-weight:bold;color:#1f2933;">{{Subject}}</td></tr>
<tr><td style="padding:0 32px 32px 32px;font-size:14px;line-height:22px;color:#3e4c59;">{{Body}}</td></tr>
</table>
</td>
</tr>
</table>
</body>
</html>"#;

/// Fills `%KEY%` placeholders known for the event, then `%FIRST_NAME%`. Keys the event
/// defines but the data lacks become empty; unknown keys in the data are ignored.
pub fn fill_placeholders(
    template: &str,
    event_type: EventType,
    first_name: &str,
    data: &HashMap<String, String>,
) -> String {
    let mut body = template.to_string();

    for key in event_type.placeholders() {
        let value = data.get(*key).map(String::as_str).unwrap_or_default();
        body = body.replace(&format!("%{}%", key), value);
    }

    body.replace("%FIRST_NAME%", first_name)
}

pub fn render(
    channel: ChannelType,
    event_type: EventType,
    target: &DeliveryTarget,
    data: &HashMap<String, String>,
) -> RenderedMessage {
    let body = fill_placeholders(
        &target.message_template,
        event_type,
        &target.first_name,
        data,
    );

    let body = match channel {
        ChannelType::Email => wrap_email(&target.subject, &body),
        _ => body.replace("\\n", "\n"),
    };

    RenderedMessage {
        subject: target.subject.clone(),
        body,
    }
}

fn wrap_email(subject: &str, body: &str) -> String {
    let body = body.replace("\\n", "<br>").replace('\n', "<br>");

    EMAIL_SHELL
        .replace("{{Subject}}", subject)
        .replace("{{Body}}", &body)
}
