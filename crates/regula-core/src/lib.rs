//! # regula-core
//!
//! Deterministic regulatory rule evaluation and consistency verification.
//!
//! This crate answers two questions about an encoded regulatory rule:
//! - Given a scenario's facts, what does the rule decide, and why?
//! - How far can the encoding be trusted to say what its legal source says?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same rule and facts always produce the same decision
//! 2. **Traceable**: Every decision carries the branch conditions it took
//! 3. **Evidence-based**: Every trust judgment is backed by scored evidence
//! 4. **Degrades gracefully**: Without ML models, heuristics stand in
//!
//! ## Example
//!
//! ```rust,ignore
//! use regula_core::{DecisionEngine, Rule, VerificationOrchestrator};
//!
//! let rule = Rule::from_file("rules/mica_art36.yaml")?;
//! let facts = serde_json::json!({"instrument_type": "art", "is_authorized": true});
//! let decision = DecisionEngine::new().evaluate(&rule, facts.as_object().unwrap());
//! println!("{:?}", decision.decision);
//!
//! let block = VerificationOrchestrator::default()
//!     .verify_rule(&rule, Some(article_text), &[0, 1, 2, 3, 4], false)?;
//! println!("{} ({:.2})", block.summary.status, block.summary.confidence);
//! ```

pub mod aggregator;
pub mod config;
pub mod drift;
pub mod engine;
pub mod evaluator;
pub mod evidence;
pub mod models;
pub mod orchestrator;
pub mod rule;
pub mod source;
pub mod text;
pub mod tiers;

// Re-export main types at crate root
pub use aggregator::{compute_summary, Aggregator};
pub use config::{ConfigError, SimilarityBands, TierWeights, VerificationConfig};
pub use drift::{check_rule_drift, DriftSeverity, DriftType, RuleDriftResult};
pub use engine::{DecisionEngine, DecisionResult, TraceStep};
pub use evaluator::{evaluate, Facts};
pub use evidence::{
    ConsistencyBlock, ConsistencyEvidence, ConsistencyStatus, ConsistencySummary,
    EvidenceBuilder, EvidenceLabel, HumanOverride, InvalidTier, Tier,
};
pub use models::{
    EntailmentClassifier, HashingEncoder, LazyModel, ModelError, NliLabel, NliScores,
    SentenceEncoder,
};
pub use orchestrator::{VerificationError, VerificationOrchestrator, VerificationRequest};
pub use rule::{
    Condition, DecisionBranch, DecisionLeaf, DecisionNode, FieldCondition, Modality,
    Obligation, Operator, Rule, RuleError, SourceCitation,
};
pub use source::{SourceLibrary, SourceLookup};
pub use tiers::{CheckContext, TierCheck};
