//! Messages accepted by the session actor

use tokio::sync::oneshot;

use crate::call::{Call, CallId};
use crate::provider::{AgentCredentials, DialRequest};
use crate::registration::RegistrationInfo;
use crate::state_machine::CallCommand;
use crate::status::{AgentStatus, EffectiveStatus};
use crate::error::SoftphoneResult;

pub(crate) type Reply<T> = oneshot::Sender<SoftphoneResult<T>>;

#[derive(Debug)]
pub(crate) enum Command {
    Initialize {
        credentials: AgentCredentials,
        reply: Reply<RegistrationInfo>,
    },
    Dial {
        request: DialRequest,
        reply: Reply<Call>,
    },
    Call {
        call_id: CallId,
        command: CallCommand,
        reply: Reply<()>,
    },
    SetStatus {
        status: AgentStatus,
        reply: Reply<EffectiveStatus>,
    },
    RefreshQueues {
        reply: Reply<usize>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Command::Initialize { .. } => "initialize",
            Command::Dial { .. } => "dial",
            Command::Call { command, .. } => command.name(),
            Command::SetStatus { .. } => "set_status",
            Command::RefreshQueues { .. } => "refresh_queues",
            Command::Shutdown { .. } => "shutdown",
        }
    }
}
