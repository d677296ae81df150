//! Stage cache keys.
//!
//! A `StageKey` can only be built from a stage name plus both fingerprints,
//! so two keys compare equal exactly when recomputation would see equal
//! inputs and an equal context subset.

use riskalign_core::{Context, Fingerprint, PipelineResult, StageInputs, StageName};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageKey {
    /// Private inner data - cannot be constructed externally
    inner: StageKeyInner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct StageKeyInner {
    stage: StageName,
    input: Fingerprint,
    context: Fingerprint,
}

impl StageKey {
    pub fn new(stage: StageName, input: Fingerprint, context: Fingerprint) -> Self {
        Self {
            inner: StageKeyInner {
                stage,
                input,
                context,
            },
        }
    }

    /// Derive the key for `stage` from its assembled inputs and the context
    /// fields it declares.
    pub fn derive(stage: StageName, inputs: &StageInputs, context: &Context) -> PipelineResult<Self> {
        let input = inputs.fingerprint(stage)?;
        let context = context.fingerprint(stage.context_dependencies())?;
        Ok(Self::new(stage, input, context))
    }

    pub fn stage(&self) -> StageName {
        self.inner.stage
    }

    pub fn input_fingerprint(&self) -> Fingerprint {
        self.inner.input
    }

    pub fn context_fingerprint(&self) -> Fingerprint {
        self.inner.context
    }
}

impl fmt::Display for StageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.inner.stage,
            self.inner.input.short(),
            self.inner.context.short()
        )
    }
}
