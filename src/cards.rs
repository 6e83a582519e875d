use crate::models::{MetricKind, MetricResult, PipelineStage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CardPhase {
    Idle,
    Probing,
    Filtering,
    Querying,
    Aggregating,
    Done,
    Degraded,
}

impl From<PipelineStage> for CardPhase {
    fn from(stage: PipelineStage) -> Self {
        match stage {
            PipelineStage::Probing => Self::Probing,
            PipelineStage::Filtering => Self::Filtering,
            PipelineStage::Querying => Self::Querying,
            PipelineStage::Aggregating => Self::Aggregating,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardState {
    pub phase: CardPhase,
    pub generation: u64,
    pub result: Option<MetricResult>,
}

impl Default for CardState {
    fn default() -> Self {
        Self {
            phase: CardPhase::Idle,
            generation: 0,
            result: None,
        }
    }
}

/// Ties an in-flight pipeline to the mount that started it.
#[derive(Debug, Clone)]
pub struct CardTicket {
    pub kind: MetricKind,
    pub generation: u64,
    board: CardBoard,
}

impl CardTicket {
    /// Records a phase change; `false` once the card has been unmounted or
    /// remounted.
    pub async fn advance(&self, stage: PipelineStage) -> bool {
        self.board.apply(self, CardPhase::from(stage), None).await
    }

    /// Stores the final result unless the ticket is stale.
    pub async fn finish(&self, result: MetricResult) -> bool {
        let phase = if result.is_degraded() {
            CardPhase::Degraded
        } else {
            CardPhase::Done
        };
        let applied = self.board.apply(self, phase, Some(result)).await;
        if !applied {
            tracing::debug!(
                metric = self.kind.as_str(),
                generation = self.generation,
                "discarded result for unmounted card"
            );
        }
        applied
    }
}

/// Per-card state for a dashboard page.
#[derive(Debug, Clone, Default)]
pub struct CardBoard {
    cards: Arc<Mutex<HashMap<MetricKind, CardState>>>,
}

impl CardBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new pipeline for `kind`. Any earlier ticket becomes stale.
    pub async fn mount(&self, kind: MetricKind) -> CardTicket {
        let mut cards = self.cards.lock().await;
        let state = cards.entry(kind).or_default();
        state.generation += 1;
        state.phase = CardPhase::Probing;
        state.result = None;
        CardTicket {
            kind,
            generation: state.generation,
            board: self.clone(),
        }
    }

    pub async fn unmount(&self, kind: MetricKind) {
        let mut cards = self.cards.lock().await;
        if let Some(state) = cards.get_mut(&kind) {
            state.generation += 1;
            state.phase = CardPhase::Idle;
            state.result = None;
        }
    }

    pub async fn state(&self, kind: MetricKind) -> CardState {
        let cards = self.cards.lock().await;
        cards.get(&kind).cloned().unwrap_or_default()
    }

    async fn apply(&self, ticket: &CardTicket, phase: CardPhase, result: Option<MetricResult>) -> bool {
        let mut cards = self.cards.lock().await;
        let Some(state) = cards.get_mut(&ticket.kind) else {
            return false;
        };
        if state.generation != ticket.generation {
            return false;
        }
        state.phase = phase;
        if result.is_some() {
            state.result = result;
        }
        true
    }
}
