//! Escape tokens accepted in `setValue` text.
//!
//! - `\n` is the enter marker: submit after typing. At most one, and it
//!   must be the last thing in the value.
//! - `\r` is the soft-newline marker: a line break that does not submit.
//!   At most two.
//!
//! Both the two-character escape (backslash + letter) and the raw control
//! character are recognised, since models emit either.

use webpilot_core::error::ElementError;

const MAX_SOFT_NEWLINES: usize = 2;

/// How a value is typed: text runs separated by soft newlines, then an optional submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingPlan {
    pub lines: Vec<String>,
    pub submit: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Enter,
    SoftNewline,
}

/// Split a value into a typing plan, rejecting marker combinations outside the policy.
pub fn plan(value: &str) -> Result<TypingPlan, ElementError> {
    let mut lines = vec![String::new()];
    let mut tokens: Vec<Token> = Vec::new();
    let mut after_enter = false;

    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        let token = match c {
            '\n' => Some(Token::Enter),
            '\r' => Some(Token::SoftNewline),
            '\\' => match chars.peek() {
                Some('n') => {
                    chars.next();
                    Some(Token::Enter)
                }
                Some('r') => {
                    chars.next();
                    Some(Token::SoftNewline)
                }
                _ => None,
            },
            _ => None,
        };

        if after_enter {
            return Err(ElementError::TextPolicy(
                "the enter marker must be the last thing in the value".into(),
            ));
        }

        match token {
            Some(Token::Enter) => {
                tokens.push(Token::Enter);
                after_enter = true;
            }
            Some(Token::SoftNewline) => {
                tokens.push(Token::SoftNewline);
                lines.push(String::new());
            }
            None => {
                if let Some(line) = lines.last_mut() {
                    line.push(c);
                }
            }
        }
    }

    let soft = tokens.iter().filter(|t| **t == Token::SoftNewline).count();
    if soft > MAX_SOFT_NEWLINES {
        return Err(ElementError::TextPolicy(format!(
            "at most {MAX_SOFT_NEWLINES} soft newline markers are allowed, found {soft}"
        )));
    }

    Ok(TypingPlan {
        lines,
        submit: after_enter,
    })
}
