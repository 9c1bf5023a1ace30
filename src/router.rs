// Inbound event routing. Transport adapters normalize their update
// shapes into `Inbound` values; the router turns them into replies and
// drives the submission and operator flows. Navigation that the router
// initiates itself (returning home after a cancel) is an internal
// event, never a fabricated inbound one.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::broadcast::{BroadcastCounts, BroadcastReport, CancelFlag, ProgressSink};
use crate::cohorts::Cohort;
use crate::error::{Result, RoundupError};
use crate::ops::OpsPanel;
use crate::store::ContactStore;
use crate::submission::{SubmissionPhase, SubmissionStep, SubmissionWorkflow};
use crate::transport::{ChatTransport, Link, OutboundMessage};

/// A normalized inbound update from whatever chat transport fronts the
/// service.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Inbound {
    Command {
        user_id: i64,
        name: String,
        args: Vec<String>,
    },
    Callback {
        user_id: i64,
        data: String,
    },
    Text {
        user_id: i64,
        text: String,
    },
}

impl Inbound {
    pub fn user_id(&self) -> i64 {
        match self {
            Inbound::Command { user_id, .. }
            | Inbound::Callback { user_id, .. }
            | Inbound::Text { user_id, .. } => *user_id,
        }
    }
}

/// Router-initiated navigation. Kept separate from `Inbound` so no
/// handler ever has to forge an inbound update to reuse a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InternalEvent {
    NavigateHome,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Button {
    pub label: String,
    /// Callback payload echoed back as `Inbound::Callback { data }`.
    pub action: String,
}

impl Button {
    fn new(label: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: action.into(),
        }
    }
}

/// A rendered reply: text plus an optional inline keyboard or link.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Reply {
    pub text: String,
    pub keyboard: Vec<Vec<Button>>,
    pub link: Option<Link>,
}

impl Reply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: Vec::new(),
            link: None,
        }
    }

    fn with_keyboard(text: impl Into<String>, keyboard: Vec<Vec<Button>>) -> Self {
        Self {
            text: text.into(),
            keyboard,
            link: None,
        }
    }
}

pub struct Router {
    store: Arc<dyn ContactStore>,
    workflow: Arc<SubmissionWorkflow>,
    ops: Arc<OpsPanel>,
    transport: Arc<dyn ChatTransport>,
}

impl Router {
    pub fn new(
        store: Arc<dyn ContactStore>,
        workflow: Arc<SubmissionWorkflow>,
        ops: Arc<OpsPanel>,
        transport: Arc<dyn ChatTransport>,
    ) -> Self {
        Self {
            store,
            workflow,
            ops,
            transport,
        }
    }

    /// Handle one inbound update. Validation problems become replies to
    /// the user; only infrastructure failures surface as errors.
    pub async fn dispatch(&self, inbound: Inbound) -> Result<Reply> {
        let user_id = inbound.user_id();
        if self.store.register_user(user_id).await? {
            info!(user_id, "Registered new user on first contact");
        }

        if let Some(gate) = self.subscription_gate(&inbound).await? {
            return Ok(gate);
        }

        let result = match inbound {
            Inbound::Command { user_id, name, args } => {
                self.handle_command(user_id, &name, &args).await
            }
            Inbound::Callback { user_id, data } => self.handle_callback(user_id, &data).await,
            Inbound::Text { user_id, text } => self.handle_text(user_id, &text).await,
        };

        match result {
            Ok(reply) => Ok(reply),
            // User-facing validation notices become replies.
            Err(RoundupError::Validation(message)) => Ok(Reply::text(message)),
            Err(RoundupError::CapacityConflict { cohort_id }) => Ok(Reply::text(format!(
                "😔 Group {cohort_id} just filled up before your confirmation. Please pick another group."
            ))),
            Err(RoundupError::NotFound { kind, id }) => {
                Ok(Reply::text(format!("Could not find {kind} {id}.")))
            }
            Err(other) => Err(other),
        }
    }

    /// Unsubscribed users only get the home view until they resubscribe.
    async fn subscription_gate(&self, inbound: &Inbound) -> Result<Option<Reply>> {
        let user_id = inbound.user_id();
        let Some(user) = self.store.find_user(user_id).await? else {
            return Ok(None);
        };
        if user.subscribed {
            return Ok(None);
        }
        if matches!(inbound, Inbound::Command { name, .. } if name == "start") {
            self.store.set_user_subscribed(user_id, true).await?;
            debug!(user_id, "User resubscribed via start");
            return Ok(None);
        }
        Ok(Some(Reply::text(
            "You are currently unsubscribed. Send /start to use the service again.",
        )))
    }

    async fn handle_command(&self, user_id: i64, name: &str, args: &[String]) -> Result<Reply> {
        match name {
            "start" => Ok(self.internal(InternalEvent::NavigateHome, user_id)),
            "help" => Ok(tutorial_view()),
            "addgroup" => {
                let tier = parse_tier_arg(args)?;
                let cohort = self.ops.add_group(user_id, tier).await?;
                Ok(Reply::text(format!(
                    "✅ Group {} created with capacity {}.",
                    cohort.id, cohort.capacity
                )))
            }
            "approve" => {
                let cohort_id = args
                    .first()
                    .ok_or_else(|| {
                        RoundupError::Validation("Usage: /approve <group id>".into())
                    })?
                    .clone();
                let outcome = self
                    .ops
                    .approve_group(user_id, &cohort_id, &CancelFlag::new())
                    .await?;
                Ok(Reply::text(format!(
                    "✅ Group {} approved.\n👥 Participants: {}\n📨 Notified: {}\n🔗 {}",
                    outcome.cohort_id,
                    outcome.total_participants,
                    outcome.notification_counts.success,
                    outcome.locator.url
                )))
            }
            "groups" => {
                let cohorts = self.ops.list_groups(user_id).await?;
                if cohorts.is_empty() {
                    return Ok(Reply::text("No active groups."));
                }
                let lines: Vec<String> = cohorts
                    .iter()
                    .map(|c| format!("{} ({}/{})", c.id, c.member_count, c.capacity))
                    .collect();
                Ok(Reply::text(format!("Active groups:\n{}", lines.join("\n"))))
            }
            "groupstats" => {
                let page = self.ops.group_stats(user_id, 1).await?;
                Ok(stats_reply(page))
            }
            "broadcast" => {
                self.ops.request_broadcast(user_id).await?;
                Ok(Reply::text(
                    "📣 Send the message you want to broadcast to all users.",
                ))
            }
            "users" => {
                let count = self.ops.user_count(user_id).await?;
                Ok(Reply::text(format!("👥 Total users: {count}")))
            }
            other => {
                debug!(user_id, command = other, "Unknown command");
                Ok(Reply::text("Unknown command. Send /start for the menu."))
            }
        }
    }

    async fn handle_callback(&self, user_id: i64, data: &str) -> Result<Reply> {
        match data {
            "home" => Ok(self.internal(InternalEvent::NavigateHome, user_id)),
            "submit" => {
                let step = self.workflow.start(user_id).await?;
                self.render_step(step)
            }
            "confirm" => {
                let step = self.workflow.confirm(user_id).await?;
                self.render_step(step)
            }
            "cancel" => {
                self.workflow.cancel(user_id).await;
                Ok(self.internal(InternalEvent::NavigateHome, user_id))
            }
            "mine" => self.my_submissions_view(user_id).await,
            "tutorial" => Ok(tutorial_view()),
            "about" => Ok(about_view()),
            other => {
                if let Some(tier) = other.strip_prefix("group:") {
                    let tier: u32 = tier.parse().map_err(|_| {
                        RoundupError::Validation("Unrecognized group selection.".into())
                    })?;
                    let step = self.workflow.select_tier(user_id, tier).await?;
                    return self.render_step(step);
                }
                if let Some(page) = other.strip_prefix("stats:") {
                    let page: usize = page.parse().map_err(|_| {
                        RoundupError::Validation("Unrecognized stats page.".into())
                    })?;
                    let page = self.ops.group_stats(user_id, page).await?;
                    return Ok(stats_reply(page));
                }
                warn!(user_id, data = other, "Unrecognized callback payload");
                Ok(Reply::text("That button has expired. Send /start."))
            }
        }
    }

    /// Free text is contextual: a pending broadcast prompt claims it
    /// first, then an open details prompt. Anything else gets a nudge.
    async fn handle_text(&self, user_id: i64, text: &str) -> Result<Reply> {
        if self.ops.has_pending_broadcast(user_id).await {
            let sink = OperatorReportSink {
                transport: self.transport.clone(),
                operator_id: user_id,
            };
            let report = self
                .ops
                .run_broadcast(user_id, text, &sink, &CancelFlag::new())
                .await?;
            return Ok(broadcast_summary_reply(&report));
        }

        if self.workflow.session_phase(user_id).await == Some(SubmissionPhase::AwaitingDetails) {
            let step = self.workflow.submit_details(user_id, text).await?;
            return self.render_step(step);
        }

        Ok(Reply::text(
            "I wasn't expecting a message. Send /start for the menu.",
        ))
    }

    fn internal(&self, event: InternalEvent, user_id: i64) -> Reply {
        match event {
            InternalEvent::NavigateHome => {
                debug!(user_id, "Navigating home");
                home_view()
            }
        }
    }

    fn render_step(&self, step: SubmissionStep) -> Result<Reply> {
        Ok(match step {
            SubmissionStep::SelectionPrompt { cohorts } => selection_view(&cohorts),
            SubmissionStep::DetailsPrompt { cohort } => Reply::with_keyboard(
                format!(
                    "📌 {}\n👥 Members: {}/{}\n\nSend your details in this format:\nName: John Doe\nNumber: +256787xxxxxx",
                    cohort.id, cohort.member_count, cohort.capacity
                ),
                vec![vec![Button::new("❌ Cancel", "cancel")]],
            ),
            SubmissionStep::ConfirmationPrompt { cohort_id, details } => Reply::with_keyboard(
                format!(
                    "Please confirm your submission to {}:\n\nName: {}\nNumber: {}",
                    cohort_id, details.display_name, details.phone_number
                ),
                vec![vec![
                    Button::new("✅ Confirm", "confirm"),
                    Button::new("❌ Cancel", "cancel"),
                ]],
            ),
            SubmissionStep::Confirmed { cohort } => Reply::with_keyboard(
                format!(
                    "🎉 Submission received!\n📌 {}\n👥 Members: {}/{}\nYou will be notified when the group is approved.",
                    cohort.id, cohort.member_count, cohort.capacity
                ),
                vec![vec![Button::new("🏠 Home", "home")]],
            ),
            SubmissionStep::CohortFull { cohort_id } => Reply::with_keyboard(
                format!("😔 Group {cohort_id} is already full. Please pick another group."),
                vec![vec![Button::new("🏠 Home", "home")]],
            ),
            SubmissionStep::Cancelled => home_view(),
        })
    }

    async fn my_submissions_view(&self, user_id: i64) -> Result<Reply> {
        match self.workflow.my_submission(user_id).await? {
            Some((participant, cohort)) => Ok(Reply::with_keyboard(
                format!(
                    "📋 Your submission:\n\nName: {}\nNumber: {}\n📌 Group: {} ({}/{})\n📌 Status: {}",
                    participant.display_name,
                    participant.phone_number,
                    cohort.id,
                    cohort.member_count,
                    cohort.capacity,
                    cohort.status
                ),
                vec![vec![Button::new("🏠 Home", "home")]],
            )),
            None => Ok(Reply::with_keyboard(
                "You have no submissions yet.",
                vec![vec![
                    Button::new("📱 Submit My Number", "submit"),
                    Button::new("🏠 Home", "home"),
                ]],
            )),
        }
    }
}

/// Progress sink that reports back to the operator who launched the
/// broadcast. Delivery of the progress message itself is best effort.
struct OperatorReportSink {
    transport: Arc<dyn ChatTransport>,
    operator_id: i64,
}

#[async_trait]
impl ProgressSink for OperatorReportSink {
    async fn on_progress(&self, counts: BroadcastCounts) {
        let message = OutboundMessage::text(format!(
            "📣 Broadcast progress: {} processed ({} ok, {} blocked, {} unreachable, {} errors)",
            counts.processed, counts.success, counts.blocked, counts.unreachable, counts.error
        ));
        let _ = self
            .transport
            .send_direct(self.operator_id, &message)
            .await;
    }

    // The final summary is the dispatch reply itself; emitting it here
    // too would double-message the operator.
    async fn on_complete(&self, _report: &BroadcastReport) {}
}

fn parse_tier_arg(args: &[String]) -> Result<u32> {
    args.first()
        .and_then(|a| a.parse::<u32>().ok())
        .filter(|&tier| tier > 0)
        .ok_or_else(|| RoundupError::Validation("Usage: /addgroup <positive group size>".into()))
}

fn home_view() -> Reply {
    Reply::with_keyboard(
        "👋 Welcome to VCF Roundup!\n\nSubmit your contact to a group and get the group's \
         contact file once it fills up and is approved.",
        vec![
            vec![Button::new("📱 Submit My Number", "submit")],
            vec![
                Button::new("📋 My Submissions", "mine"),
                Button::new("📖 Tutorial", "tutorial"),
            ],
            vec![Button::new("ℹ️ About", "about")],
        ],
    )
}

fn selection_view(cohorts: &[Cohort]) -> Reply {
    if cohorts.is_empty() {
        return Reply::with_keyboard(
            "No groups are open right now. Please check back later.",
            vec![vec![Button::new("🏠 Home", "home")]],
        );
    }
    let mut keyboard: Vec<Vec<Button>> = cohorts
        .iter()
        .map(|c| {
            vec![Button::new(
                format!("{} ({}/{})", c.id, c.member_count, c.capacity),
                format!("group:{}", c.tier()),
            )]
        })
        .collect();
    keyboard.push(vec![Button::new("🏠 Home", "home")]);
    Reply::with_keyboard("Choose a group to join:", keyboard)
}

fn tutorial_view() -> Reply {
    Reply::with_keyboard(
        "📖 How it works:\n\n1. Pick a group.\n2. Send your name and number in the format:\n\
         Name: John Doe\nNumber: +256787xxxxxx\n3. Confirm your submission.\n4. When the group \
         fills up and is approved, you receive the contact file link.",
        vec![vec![Button::new("🏠 Home", "home")]],
    )
}

fn about_view() -> Reply {
    Reply::with_keyboard(
        "ℹ️ VCF Roundup collects contact submissions into fixed-size groups and distributes \
         each group's contact file to its members after operator approval.",
        vec![vec![Button::new("🏠 Home", "home")]],
    )
}

fn stats_reply(page: crate::ops::StatsPage) -> Reply {
    let mut nav = Vec::new();
    if page.has_prev {
        nav.push(Button::new("⬅️ Prev", format!("stats:{}", page.page - 1)));
    }
    if page.has_next {
        nav.push(Button::new("Next ➡️", format!("stats:{}", page.page + 1)));
    }
    let keyboard = if nav.is_empty() { Vec::new() } else { vec![nav] };
    Reply {
        text: page.body,
        keyboard,
        link: None,
    }
}

fn broadcast_summary_reply(report: &BroadcastReport) -> Reply {
    let counts = report.counts;
    let mut text = format!(
        "📣 Broadcast finished in {}s\n\n✅ Success: {}\n🚫 Blocked: {}\n👻 Unreachable: {}\n⚠️ Errors: {}\n📊 Total: {}",
        report.elapsed.as_secs(),
        counts.success,
        counts.blocked,
        counts.unreachable,
        counts.error,
        counts.processed
    );
    if report.cancelled {
        text.push_str("\n\n(cancelled before completion)");
    }
    Reply::text(text)
}
