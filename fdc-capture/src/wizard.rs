//! Linear survey wizard
//!
//! Steps `Perfil → Temas → Opinion → Cierre`, plus the terminal `Submitted`.
//! `next` is gated on the caller's validation result; `back` is allowed
//! everywhere except the first step. The current step and draft are
//! published on a watch channel so the autosaver can snapshot them without
//! borrowing the session.

use crate::draft::SurveyDraft;
use crate::error::{CaptureError, Result};
use crate::validator::ValidationResult;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardStep {
    Perfil,
    Temas,
    Opinion,
    Cierre,
    Submitted,
}

impl WizardStep {
    /// Form steps in order (excludes the terminal state)
    pub const FORM_STEPS: [WizardStep; 4] = [
        WizardStep::Perfil,
        WizardStep::Temas,
        WizardStep::Opinion,
        WizardStep::Cierre,
    ];

    /// 1-based step number; `None` for `Submitted`
    pub fn number(self) -> Option<u8> {
        match self {
            WizardStep::Perfil => Some(1),
            WizardStep::Temas => Some(2),
            WizardStep::Opinion => Some(3),
            WizardStep::Cierre => Some(4),
            WizardStep::Submitted => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == WizardStep::Submitted
    }

    pub fn is_last_form_step(self) -> bool {
        self == WizardStep::Cierre
    }

    fn following(self) -> Option<WizardStep> {
        match self {
            WizardStep::Perfil => Some(WizardStep::Temas),
            WizardStep::Temas => Some(WizardStep::Opinion),
            WizardStep::Opinion => Some(WizardStep::Cierre),
            WizardStep::Cierre | WizardStep::Submitted => None,
        }
    }

    fn preceding(self) -> Option<WizardStep> {
        match self {
            WizardStep::Temas => Some(WizardStep::Perfil),
            WizardStep::Opinion => Some(WizardStep::Temas),
            WizardStep::Cierre => Some(WizardStep::Opinion),
            WizardStep::Perfil | WizardStep::Submitted => None,
        }
    }
}

/// Snapshot published to observers
#[derive(Debug, Clone, PartialEq)]
pub struct WizardView {
    pub step: WizardStep,
    pub draft: SurveyDraft,
}

/// Step state machine over one draft
pub struct Wizard {
    view_tx: watch::Sender<WizardView>,
}

impl Wizard {
    pub fn new(draft: SurveyDraft) -> Self {
        let (view_tx, _) = watch::channel(WizardView {
            step: WizardStep::Perfil,
            draft,
        });
        Self { view_tx }
    }

    pub fn step(&self) -> WizardStep {
        self.view_tx.borrow().step
    }

    pub fn draft(&self) -> SurveyDraft {
        self.view_tx.borrow().draft.clone()
    }

    pub fn view(&self) -> WizardView {
        self.view_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WizardView> {
        self.view_tx.subscribe()
    }

    /// Mutate the draft in place
    pub fn update<F: FnOnce(&mut SurveyDraft)>(&self, edit: F) -> Result<()> {
        self.ensure_open("update")?;
        self.view_tx.send_modify(|view| edit(&mut view.draft));
        Ok(())
    }

    /// Advance if `validation` has no blocking errors
    ///
    /// Returns the step the wizard is on afterwards; a blocked advance leaves
    /// it where it was.
    pub fn next(&self, validation: &ValidationResult) -> Result<WizardStep> {
        self.ensure_open("next")?;
        let current = self.step();
        let following = current.following().ok_or_else(|| {
            CaptureError::InvalidState("already on the last step; submit instead".to_string())
        })?;

        if !validation.can_advance() {
            debug!(
                step = ?current,
                errors = validation.blocking_errors.len(),
                "Advance blocked by validation"
            );
            return Ok(current);
        }

        self.set_step(following);
        Ok(following)
    }

    /// Go back one step
    pub fn back(&self) -> Result<WizardStep> {
        self.ensure_open("back")?;
        let preceding = self.step().preceding().ok_or_else(|| {
            CaptureError::InvalidState("cannot go back from the first step".to_string())
        })?;
        self.set_step(preceding);
        Ok(preceding)
    }

    /// Replace draft and step wholesale (recovery)
    pub fn restore(&self, draft: SurveyDraft, step: WizardStep) -> Result<()> {
        if step.is_terminal() {
            return Err(CaptureError::InvalidState(
                "cannot restore into the submitted state".to_string(),
            ));
        }
        self.view_tx.send_replace(WizardView { step, draft });
        Ok(())
    }

    /// Enter the terminal state
    pub fn mark_submitted(&self) {
        self.set_step(WizardStep::Submitted);
    }

    /// Start a fresh draft on the first step
    pub fn reset(&self, draft: SurveyDraft) {
        self.view_tx.send_replace(WizardView {
            step: WizardStep::Perfil,
            draft,
        });
    }

    fn set_step(&self, step: WizardStep) {
        self.view_tx.send_modify(|view| view.step = step);
    }

    fn ensure_open(&self, operation: &str) -> Result<()> {
        if self.step().is_terminal() {
            return Err(CaptureError::InvalidState(format!(
                "'{}' after the response was submitted",
                operation
            )));
        }
        Ok(())
    }
}
