//! Prompt construction.

use crate::generator::{LeadProfile, PreviousEmail, TemplateInput};

const OUTPUT_FORMAT: &str = r#"OUTPUT FORMAT (JSON only, no markdown):
{
  "subject": "...",
  "body": "..."
}"#;

pub fn initial_email_prompt(template: &TemplateInput, lead: &LeadProfile) -> String {
    let subject = template.subject.as_deref().unwrap_or("[Generate subject]");
    let company = lead.company.as_deref().unwrap_or("Not specified");
    let position = lead.position.as_deref().unwrap_or("Not specified");
    let notes = lead.notes.as_deref().unwrap_or("No additional context");

    format!(
        "You are an email copywriter. Generate a personalized cold outreach email.

CAMPAIGN TEMPLATE:
Subject: {subject}
Body:
{body}

RECIPIENT:
Name: {name}
Company: {company}
Position: {position}
Notes: {notes}

INSTRUCTIONS:
1. Personalize the email based on the recipient's name, company, position, and notes when available
2. If company or position are provided, use them naturally for context (e.g., referencing their role or company)
3. Keep the core message and value proposition from the template
4. Make it feel personal, not templated
5. Keep it concise (under 150 words for body)
6. Do not include [brackets] or placeholders in output
7. Do not make up or assume company/position details if not provided

{OUTPUT_FORMAT}",
        body = template.body,
        name = lead.name,
    )
}

pub fn followup_email_prompt(previous: &PreviousEmail, lead: &LeadProfile) -> String {
    format!(
        "You are an email copywriter. Generate a polite follow-up email.

PREVIOUS EMAIL SENT:
Subject: {subject}
Body:
{body}

RECIPIENT: {name}

INSTRUCTIONS:
1. Reference the previous email naturally
2. Be brief and polite (under 80 words)
3. Include a soft call-to-action
4. Do not repeat the full original pitch

{OUTPUT_FORMAT}",
        subject = previous.subject,
        body = previous.body,
        name = lead.name,
    )
}
