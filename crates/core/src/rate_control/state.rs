//! Rate control state machine.

use serde::Serialize;

/// Phase of the rate controller.
///
/// ```text
///            ┌──────────┐  rate ≥ ceiling  ┌──────────────┐
///  start ───►│ Growing  │◄─────────────────│  Recovering  │◄──┐
///            └────┬─────┘                  └──────┬───────┘   │
///                 │ bufferbloat                   │ bufferbloat
///                 ▼                               ▼           │
///            ┌──────────────────────────────────────────┐     │
///            │ Backoff (rate cut to B × reference rate) │─────┘
///            └──────────────────────────────────────────┘ next tick
/// ```
///
/// `Backoff` can be entered from any state, including itself when several
/// regressions arrive before the next tick; each entry re-anchors the
/// reference rate at the current (already reduced) rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlState {
    /// Rate doubles every tick up to the ceiling.
    #[default]
    Growing,
    /// Rate has just been cut; transient until the next tick.
    Backoff,
    /// Rate follows the cubic curve anchored at the last bufferbloat event.
    Recovering,
}

impl std::fmt::Display for ControlState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ControlState::Growing => "growing",
            ControlState::Backoff => "backoff",
            ControlState::Recovering => "recovering",
        };
        f.write_str(name)
    }
}
