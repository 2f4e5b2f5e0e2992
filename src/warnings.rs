//! Advisory warnings and the capability verdict surfaced on
//! [`crate::TranslationResult`]. See §7 of the error-handling design: no
//! warning is ever swallowed silently, and the capability grade is derived
//! from whichever warnings a translation accumulated.

/// One advisory note: a pattern was rewritten, partially supported, or
/// (in non-strict mode) dropped outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub code: String,
    pub message: String,
}

impl Warning {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Warning {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// The translator's self-reported fidelity grade for one `translate()`
/// call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    FullSupport,
    Emulated,
    Partial,
    ClientSideOnly,
    Unsupported,
}

/// Derives the capability grade from the accumulated warning codes, per
/// §7: `FULL_SUPPORT` when no warning applies, `EMULATED` when a
/// supported-but-rewritten pattern was used, `PARTIAL` when any other
/// warning is present. `UNSUPPORTED`/`CLIENT_SIDE_ONLY` are reserved for
/// the exception path and are never derived here.
pub fn capability_from_warnings(warnings: &[Warning]) -> Capability {
    if warnings.is_empty() {
        return Capability::FullSupport;
    }
    if warnings.iter().all(|w| w.code.starts_with("emulated.")) {
        Capability::Emulated
    } else {
        Capability::Partial
    }
}
