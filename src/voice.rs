//! Webhook for a voice assistant skill (Yandex Alice envelope).
//!
//! A spoken command such as "сделай раскраску капибара" is reduced to a
//! subject, which is generated, enhanced and printed before replying.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};

use crate::error::AppError;
use crate::service::ColoringRequest;
use crate::web::AppState;

/// Word stems that mark a request. The subject follows the word holding the stem.
pub const TRIGGER_KEYWORDS: &[&str] = &[
    "раскраск",
    "картинк",
    "нарису",
    "распечата",
    "coloring page",
    "picture",
    "draw",
    "print",
];

const CONNECTIVES: &[&str] = &[
    "про", "с", "со", "мне", "нам", "of", "a", "an", "the", "with", "about", "me", "for",
];

pub const CLARIFY_REPLY: &str =
    "Что нарисовать? Скажите, например: «сделай раскраску капибара».";

#[derive(Deserialize, Debug)]
pub struct AliceRequest {
    #[serde(default = "default_version")]
    pub version: Value,
    #[serde(default)]
    pub session: Value,
    #[serde(default)]
    pub request: AliceUtterance,
}

fn default_version() -> Value {
    Value::String("1.0".to_string())
}

#[derive(Deserialize, Debug, Default)]
pub struct AliceUtterance {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub original_utterance: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct AliceResponse {
    pub version: Value,
    pub session: Value,
    pub response: AliceReply,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct AliceReply {
    pub text: String,
    pub end_session: bool,
}

/// Pulls the subject out of a free-text command, or `None` when no trigger
/// keyword is present or nothing is left after it. The first trigger that
/// leaves a subject wins. A trigger word right after it ("распечатай раскраску
/// кота") or one introducing the subject ("print a picture of a cat") is
/// consumed too, while "draw a picture frame" keeps "picture frame". The
/// subject keeps the caller's casing.
pub fn extract_subject(command: &str) -> Option<String> {
    let words: Vec<&str> = command
        .split_whitespace()
        .map(|word| word.trim_matches(|c: char| c.is_ascii_punctuation() || c == '«' || c == '»'))
        .filter(|word| !word.is_empty())
        .collect();
    let lowered: Vec<String> = words.iter().map(|word| word.to_lowercase()).collect();

    (0..words.len())
        .filter_map(|index| trigger_at(&lowered, index).map(|len| index + len))
        .find_map(|start| subject_after(&words, &lowered, start))
}

/// Number of words the trigger starting at `index` spans.
fn trigger_at(lowered: &[String], index: usize) -> Option<usize> {
    TRIGGER_KEYWORDS.iter().find_map(|keyword| {
        let parts: Vec<&str> = keyword.split(' ').collect();
        let matched = parts.iter().enumerate().all(|(offset, part)| {
            lowered
                .get(index + offset)
                .is_some_and(|word| word.contains(part))
        });
        matched.then_some(parts.len())
    })
}

fn is_connective(lowered: &[String], index: usize) -> bool {
    lowered
        .get(index)
        .is_some_and(|word| CONNECTIVES.contains(&word.as_str()))
}

fn subject_after(words: &[&str], lowered: &[String], mut index: usize) -> Option<String> {
    loop {
        let mut skipped_connective = false;
        while is_connective(lowered, index) {
            index += 1;
            skipped_connective = true;
        }
        let Some(len) = trigger_at(lowered, index) else {
            break;
        };
        if skipped_connective && !is_connective(lowered, index + len) {
            break;
        }
        index += len;
    }
    (index < words.len()).then(|| words[index..].join(" "))
}

fn reply(request: AliceRequest, text: String) -> Json<AliceResponse> {
    Json(AliceResponse {
        version: request.version,
        session: request.session,
        response: AliceReply {
            text,
            end_session: false,
        },
    })
}

pub async fn alice_webhook(
    State(state): State<AppState>,
    payload: Result<Json<AliceRequest>, JsonRejection>,
) -> Result<Json<AliceResponse>, AppError> {
    let Json(request) = payload?;
    let command = if request.request.command.trim().is_empty() {
        request.request.original_utterance.clone()
    } else {
        request.request.command.clone()
    };

    let Some(subject) = extract_subject(&command) else {
        info!(%command, "No subject in voice command");
        return Ok(reply(request, CLARIFY_REPLY.to_string()));
    };
    info!(%command, %subject, "Voice request");

    let mut coloring = match ColoringRequest::new(&subject) {
        Ok(coloring) => coloring,
        Err(_) => return Ok(reply(request, CLARIFY_REPLY.to_string())),
    };
    coloring.print = true;

    let text = match state.service.create(&coloring).await {
        Ok(outcome) => match outcome.print {
            Some(result) if result.success => {
                format!("Готово! Раскраска «{subject}» отправлена на печать.")
            }
            _ => format!("Раскраска «{subject}» готова, но распечатать её не получилось."),
        },
        Err(err) => {
            error!(error = %err, %subject, "Voice request failed");
            format!("Не получилось нарисовать «{subject}». Попробуйте ещё раз.")
        }
    };
    Ok(reply(request, text))
}
