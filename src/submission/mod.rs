pub mod machine;
pub mod parser;
pub mod workflow;

pub use machine::{SubmissionEvent, SubmissionMachine, SubmissionPhase};
pub use parser::{parse_details, SubmissionDetails};
pub use workflow::{SubmissionStep, SubmissionWorkflow};
