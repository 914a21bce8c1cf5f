use thiserror::Error;

/// Errors raised inside a heal cycle
///
/// These never surface to request callers; they are visible through the
/// healing-status endpoint, metrics, and the audit log only.
#[derive(Debug, Error)]
pub enum HealError {
    /// The diagnose phase failed or returned unusable output
    #[error("diagnosis failed for {provider}: {message}")]
    DiagnosisFailed { provider: String, message: String },

    /// No research provider produced findings
    #[error("research failed for {provider}: {message}")]
    ResearchFailed { provider: String, message: String },

    /// The fix phase failed or returned unusable output
    #[error("fix generation failed for {provider}: {message}")]
    FixFailed { provider: String, message: String },

    /// The applied fix did not pass verification
    #[error("verification failed for {provider}: {message}")]
    VerificationFailed { provider: String, message: String },

    /// Version store I/O failure
    #[error("version store error for {provider}: {message}")]
    Store { provider: String, message: String },
}

impl HealError {
    /// Machine-readable kind for the audit log
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::DiagnosisFailed { .. } => "diagnosis_failed",
            Self::ResearchFailed { .. } => "research_failed",
            Self::FixFailed { .. } => "fix_failed",
            Self::VerificationFailed { .. } => "verification_failed",
            Self::Store { .. } => "store_error",
        }
    }
}
