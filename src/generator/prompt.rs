//! Prompt construction for initial builds and revisions.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::attachments::{AttachmentKind, ResolvedAttachment};
use crate::llm::ChatMessage;
use crate::task::{Round, TaskRequest};
use crate::util::truncate_chars;

/// Characters of each text attachment shown to the model.
const ATTACHMENT_PREVIEW_CHARS: usize = 1000;
/// Characters of each prior file shown to the model during a revision.
const PRIOR_FILE_CHARS: usize = 10_000;

const SYSTEM_PROMPT: &str = "You are an expert front-end engineer. You build complete, \
self-contained static web applications that are deployed to GitHub Pages and checked \
by automated tests. You always answer with files in the exact output format requested.";

const OUTPUT_FORMAT: &str = r#"**Output Format**:
Provide every file in this EXACT format, one after another:

FILE: index.html
```html
<!DOCTYPE html>
<html lang="en">
...
</html>
```

FILE: README.md
```markdown
# <task id>

## Summary
## Setup & Usage
## Features
## Code Explanation
## License
```

FILE: LICENSE
```
MIT License
...
```

Additional files (for example `script.js` or `style.css`) use the same `FILE: <relative path>` header."#;

/// Build the chat messages for one generation call.
///
/// `prior_files` is only consulted for revisions.
pub fn build_messages(
    request: &TaskRequest,
    attachments: &[ResolvedAttachment],
    prior_files: Option<&BTreeMap<String, String>>,
) -> Vec<ChatMessage> {
    let prompt = match (request.round, prior_files) {
        (Round::Revision, Some(prior)) => revision_prompt(request, attachments, prior),
        _ => initial_prompt(request, attachments),
    };
    vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)]
}

fn initial_prompt(request: &TaskRequest, attachments: &[ResolvedAttachment]) -> String {
    format!(
        r#"You are building a single-page web application for GitHub Pages deployment.

**Task ID**: {task}
**Round**: {round}

**Brief**:
{brief}

**Requirements/Checks** (your app MUST pass these):
{checks}

**Attachments**:
{attachments}

**Instructions**:
1. Generate a COMPLETE, FUNCTIONAL single-page application (HTML/CSS/JS)
2. Use CDN links for any libraries (Bootstrap, marked, highlight.js, Papaparse for CSV, etc.)
3. Keep the app self-contained in index.html (embed CSS/JS or use few additional files)
4. Handle attachments by embedding their data directly in the code
5. Implement ALL functionality described in the brief
6. Add proper error handling and user feedback
7. Use semantic HTML and accessible design

**CRITICAL REQUIREMENTS**:
- NEVER use localStorage or sessionStorage (not supported in the evaluation environment)
- Keep all state in in-memory JavaScript variables
- Make sure every element ID mentioned in the checks exists in your HTML

{format}

Generate the complete application now."#,
        task = request.task,
        round = request.round,
        brief = request.brief,
        checks = format_checks(&request.checks),
        attachments = format_attachments(attachments),
        format = OUTPUT_FORMAT,
    )
}

fn revision_prompt(
    request: &TaskRequest,
    attachments: &[ResolvedAttachment],
    prior: &BTreeMap<String, String>,
) -> String {
    let mut current = String::new();
    for (path, content) in prior {
        let _ = write!(
            current,
            "FILE: {}\n```\n{}\n```\n\n",
            path,
            truncate_chars(content, PRIOR_FILE_CHARS, "\n... (truncated for brevity)")
        );
    }
    if current.is_empty() {
        current.push_str("(the repository has no readable text files)\n");
    }

    format!(
        r#"You are revising an existing web application.

**Task ID**: {task}
**Round**: {round}

**New Requirements**:
{brief}

**New Checks** (the app MUST pass these):
{checks}

**New/Additional Attachments**:
{attachments}

**Current Code**:
{current}
**Instructions**:
1. MODIFY the existing code to add the new features; do not start over
2. Keep ALL existing functionality unless it conflicts with the new requirements
3. Keep the same structure, style and design
4. Make sure the NEW checks pass while old functionality keeps working
5. DO NOT use localStorage or sessionStorage
6. Output every file you change in full; files you do not output are left as they are
7. Update README.md with a "Round {round} Changes" section at the end

{format}

Generate the revised application now."#,
        task = request.task,
        round = request.round,
        brief = request.brief,
        checks = format_checks(&request.checks),
        attachments = format_attachments(attachments),
        current = current,
        format = OUTPUT_FORMAT,
    )
}

fn format_checks(checks: &[String]) -> String {
    if checks.is_empty() {
        return "- (no explicit checks; satisfy the brief)".to_string();
    }
    checks
        .iter()
        .map(|check| format!("- {}", check))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_attachments(attachments: &[ResolvedAttachment]) -> String {
    if attachments.is_empty() {
        return "No attachments provided.".to_string();
    }

    let mut out = String::from("Attachments provided (embed the data you need in the generated files):");
    for attachment in attachments {
        match attachment.kind {
            AttachmentKind::Link => {
                let _ = write!(out, "\n\n**{}**: {}", attachment.name, attachment.text());
            }
            kind if kind.is_textual() => {
                let _ = write!(
                    out,
                    "\n\n**{}** ({}):\n```\n{}\n```",
                    attachment.name,
                    display_media_type(attachment),
                    truncate_chars(&attachment.text(), ATTACHMENT_PREVIEW_CHARS, "\n... (truncated)")
                );
            }
            kind => {
                let _ = write!(
                    out,
                    "\n\n**{}** ({}, {:?}, {} bytes; binary content not shown)",
                    attachment.name,
                    display_media_type(attachment),
                    kind,
                    attachment.content.len()
                );
            }
        }
    }
    out
}

fn display_media_type(attachment: &ResolvedAttachment) -> &str {
    if attachment.media_type.is_empty() {
        "unknown type"
    } else {
        &attachment.media_type
    }
}
