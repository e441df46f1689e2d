//! Phase lifecycle contract: a total, static table
//! answering whether an action is allowed in a conversation phase and
//! which resources that phase requires.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversationPhase {
    StartGreeting,
    ListenRut,
    ListenOption,
    ListenConfirmation,
    WaitBody,
    WaitDv,
    Confirm,
    AskSpecialty,
    CheckAvailability,
    InformAvailability,
    Finalize,
    Complete,
    Goodbye,
    EndCall,
    None,
}

impl ConversationPhase {
    pub fn requires_input(self) -> bool {
        matches!(
            self,
            ConversationPhase::ListenRut
                | ConversationPhase::ListenOption
                | ConversationPhase::ListenConfirmation
                | ConversationPhase::WaitBody
                | ConversationPhase::WaitDv
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Playback,
    Stt,
    CreateSnoop,
    CreateBridge,
    Teardown,
    CancelResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Snoop,
    Bridge,
}

struct Descriptor {
    allow: &'static [Action],
    deny: &'static [Action],
    requires: &'static [Resource],
}

use Action::*;
use Resource::*;

/// The contract table: listening phases need the snoop+bridge and permit
/// STT; speaking-only phases permit PLAYBACK and deny STT.
fn descriptor(phase: ConversationPhase) -> Descriptor {
    match phase {
        ConversationPhase::StartGreeting => Descriptor {
            allow: &[Playback, CreateBridge, CreateSnoop],
            deny: &[Stt, CancelResponse],
            requires: &[Bridge],
        },
        ConversationPhase::ListenRut => Descriptor {
            allow: &[Stt, CreateSnoop, CancelResponse],
            deny: &[Teardown],
            requires: &[Snoop, Bridge],
        },
        ConversationPhase::ListenOption | ConversationPhase::ListenConfirmation => Descriptor {
            allow: &[Stt, CancelResponse],
            deny: &[Teardown],
            requires: &[Snoop],
        },
        ConversationPhase::WaitBody | ConversationPhase::WaitDv => Descriptor {
            allow: &[Stt, CreateSnoop, CancelResponse],
            deny: &[Teardown],
            requires: &[Snoop, Bridge],
        },
        ConversationPhase::Confirm | ConversationPhase::AskSpecialty => Descriptor {
            allow: &[Playback, Stt],
            deny: &[Teardown],
            requires: &[Bridge],
        },
        ConversationPhase::CheckAvailability | ConversationPhase::InformAvailability => Descriptor {
            allow: &[Playback, Stt],
            deny: &[Teardown],
            requires: &[Bridge],
        },
        ConversationPhase::Finalize => Descriptor {
            allow: &[Playback],
            deny: &[Stt, CancelResponse],
            requires: &[Bridge],
        },
        ConversationPhase::Complete => Descriptor {
            allow: &[Teardown],
            deny: &[Playback, Stt],
            requires: &[],
        },
        ConversationPhase::Goodbye => Descriptor {
            allow: &[Playback],
            deny: &[Stt, CancelResponse],
            requires: &[Bridge],
        },
        ConversationPhase::EndCall => Descriptor {
            allow: &[Teardown],
            deny: &[Playback, Stt],
            requires: &[],
        },
        ConversationPhase::None => Descriptor {
            allow: &[],
            deny: &[Playback, Stt, CreateSnoop, CreateBridge, Teardown, CancelResponse],
            requires: &[],
        },
    }
}

/// True iff `action` is in `phase`'s allow set. Any action absent from both
/// the allow and deny sets falls through to `deny`: the table is total and
/// unlisted pairs deny.
pub fn is_action_allowed(phase: ConversationPhase, action: Action) -> bool {
    descriptor(phase).allow.contains(&action)
}

pub fn is_resource_required(phase: ConversationPhase, resource: Resource) -> bool {
    descriptor(phase).requires.contains(&resource)
}

pub fn is_teardown_allowed(phase: ConversationPhase) -> bool {
    is_action_allowed(phase, Action::Teardown)
}
