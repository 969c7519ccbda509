//! Question handler: answers stream back as server-sent events

use axum::{
    extract::{Query, State},
    response::{
        sse::{Event, Sse},
        IntoResponse,
    },
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use tracing::instrument;
use validator::Validate;

use crate::AppState;
use answerforge_common::errors::{AppError, Result};
use answerforge_search::stream::{StreamChunk, END_DATA, END_EVENT};

/// Query string of `GET /api/ask`
#[derive(Debug, Deserialize, Validate)]
pub struct AskParams {
    #[validate(length(max = 1000))]
    pub question: Option<String>,
}

/// Answer a question
///
/// Invalid requests fail with a JSON error before any stream is opened.
#[instrument(skip(state, params))]
pub async fn ask(
    State(state): State<AppState>,
    Query(params): Query<AskParams>,
) -> Result<impl IntoResponse> {
    params.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: Some("question".to_string()),
    })?;

    let question = params
        .question
        .as_deref()
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| AppError::MissingField {
            field: "question".to_string(),
        })?;

    let outcome = state.engine.answer(question).await?;

    Ok(Sse::new(into_events(state.streamer.stream(outcome))))
}

fn into_events<S>(chunks: S) -> impl Stream<Item = std::result::Result<Event, Infallible>>
where
    S: Stream<Item = StreamChunk>,
{
    chunks.map(|chunk| {
        Ok(match chunk {
            StreamChunk::Data(text) => Event::default().data(text),
            StreamChunk::End => Event::default().event(END_EVENT).data(END_DATA),
        })
    })
}
