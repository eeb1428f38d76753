//! Keep: leave the target untouched
//!
//! The visitor still marks the target subtree as visited, which is what
//! exempts it from later, broader rules.

use super::{parse_settings, NoSettings, Processor};
use crate::anonymization::context::ProcessContext;
use crate::anonymization::result::ProcessResult;
use crate::document::{Document, NodeId};
use crate::domain::Result;
use serde_json::{Map, Value};

/// Method name
pub const NAME: &str = "keep";

#[derive(Debug, Default, Clone)]
pub struct KeepProcessor;

impl KeepProcessor {
    pub fn new() -> Self {
        Self
    }

    pub fn from_settings(settings: &Map<String, Value>) -> Result<Self> {
        parse_settings::<NoSettings>(NAME, settings)?;
        Ok(Self)
    }
}

impl Processor for KeepProcessor {
    fn name(&self) -> &str {
        NAME
    }

    fn process(
        &self,
        _doc: &mut Document,
        _node: NodeId,
        _ctx: &ProcessContext,
    ) -> Result<ProcessResult> {
        Ok(ProcessResult::new())
    }
}
