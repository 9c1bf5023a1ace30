use statig::prelude::*;
use tracing::debug;

/// Observable phase of a submission session. Mirrors the statig state so
/// callers can branch without reaching into the generated state enum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SubmissionPhase {
    #[default]
    Idle,
    AwaitingSelection,
    AwaitingDetails,
    AwaitingConfirmation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionEvent {
    Start,
    SelectCohort { cohort_id: String },
    Details { display_name: String, phone_number: String },
    Confirm,
    Cancel,
}

/// Per-user submission state machine:
/// idle → awaiting_selection → awaiting_details → awaiting_confirmation → idle.
///
/// The machine is pure bookkeeping; all storage and transport I/O lives
/// in `SubmissionWorkflow`, which feeds events in after its calls
/// succeed.
#[derive(Default)]
pub struct SubmissionMachine {
    pub user_id: i64,
    pub cohort_id: Option<String>,
    pub display_name: Option<String>,
    pub phone_number: Option<String>,
    pub phase: SubmissionPhase,
}

impl SubmissionMachine {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }

    pub fn phase(&self) -> SubmissionPhase {
        self.phase
    }

    fn reset(&mut self) {
        self.cohort_id = None;
        self.display_name = None;
        self.phone_number = None;
        self.phase = SubmissionPhase::Idle;
    }
}

#[state_machine(initial = "State::idle()")]
impl SubmissionMachine {
    #[state]
    fn idle(&mut self, event: &SubmissionEvent) -> Outcome<State> {
        match event {
            SubmissionEvent::Start => {
                self.phase = SubmissionPhase::AwaitingSelection;
                debug!(user_id = self.user_id, "Submission session started");
                Transition(State::awaiting_selection())
            }
            _ => Handled,
        }
    }

    #[state]
    fn awaiting_selection(&mut self, event: &SubmissionEvent) -> Outcome<State> {
        match event {
            SubmissionEvent::SelectCohort { cohort_id } => {
                self.cohort_id = Some(cohort_id.clone());
                self.phase = SubmissionPhase::AwaitingDetails;
                debug!(
                    user_id = self.user_id,
                    cohort_id = %cohort_id,
                    "Cohort selected, awaiting details"
                );
                Transition(State::awaiting_details())
            }
            SubmissionEvent::Cancel => {
                self.reset();
                Transition(State::idle())
            }
            _ => Handled,
        }
    }

    #[state]
    fn awaiting_details(&mut self, event: &SubmissionEvent) -> Outcome<State> {
        match event {
            SubmissionEvent::Details {
                display_name,
                phone_number,
            } => {
                self.display_name = Some(display_name.clone());
                self.phone_number = Some(phone_number.clone());
                self.phase = SubmissionPhase::AwaitingConfirmation;
                debug!(user_id = self.user_id, "Details captured, awaiting confirmation");
                Transition(State::awaiting_confirmation())
            }
            SubmissionEvent::Cancel => {
                self.reset();
                Transition(State::idle())
            }
            _ => Handled,
        }
    }

    #[state]
    fn awaiting_confirmation(&mut self, event: &SubmissionEvent) -> Outcome<State> {
        match event {
            SubmissionEvent::Confirm => {
                debug!(
                    user_id = self.user_id,
                    cohort_id = ?self.cohort_id,
                    "Submission confirmed"
                );
                self.reset();
                Transition(State::idle())
            }
            SubmissionEvent::Cancel => {
                self.reset();
                Transition(State::idle())
            }
            _ => Handled,
        }
    }
}
