//! Per-call phase state, persisted in the shared cache under `phase:<id>`
//! so any task handling the call can read the current phase.

use std::sync::Arc;

use callcore_cache::{keys, ttl, CacheError, SharedCache};
use callcore_phase::ConversationPhase;

pub fn phase_name(phase: ConversationPhase) -> &'static str {
    match phase {
        ConversationPhase::StartGreeting => "START_GREETING",
        ConversationPhase::ListenRut => "LISTEN_RUT",
        ConversationPhase::ListenOption => "LISTEN_OPTION",
        ConversationPhase::ListenConfirmation => "LISTEN_CONFIRMATION",
        ConversationPhase::WaitBody => "WAIT_BODY",
        ConversationPhase::WaitDv => "WAIT_DV",
        ConversationPhase::Confirm => "CONFIRM",
        ConversationPhase::AskSpecialty => "ASK_SPECIALTY",
        ConversationPhase::CheckAvailability => "CHECK_AVAILABILITY",
        ConversationPhase::InformAvailability => "INFORM_AVAILABILITY",
        ConversationPhase::Finalize => "FINALIZE",
        ConversationPhase::Complete => "COMPLETE",
        ConversationPhase::Goodbye => "GOODBYE",
        ConversationPhase::EndCall => "END_CALL",
        ConversationPhase::None => "NONE",
    }
}

pub fn phase_from_name(name: &str) -> Option<ConversationPhase> {
    Some(match name {
        "START_GREETING" => ConversationPhase::StartGreeting,
        "LISTEN_RUT" => ConversationPhase::ListenRut,
        "LISTEN_OPTION" => ConversationPhase::ListenOption,
        "LISTEN_CONFIRMATION" => ConversationPhase::ListenConfirmation,
        "WAIT_BODY" => ConversationPhase::WaitBody,
        "WAIT_DV" => ConversationPhase::WaitDv,
        "CONFIRM" => ConversationPhase::Confirm,
        "ASK_SPECIALTY" => ConversationPhase::AskSpecialty,
        "CHECK_AVAILABILITY" => ConversationPhase::CheckAvailability,
        "INFORM_AVAILABILITY" => ConversationPhase::InformAvailability,
        "FINALIZE" => ConversationPhase::Finalize,
        "COMPLETE" => ConversationPhase::Complete,
        "GOODBYE" => ConversationPhase::Goodbye,
        "END_CALL" => ConversationPhase::EndCall,
        "NONE" => ConversationPhase::None,
        _ => return None,
    })
}

pub async fn load_phase(cache: &Arc<dyn SharedCache>, linked_id: &str) -> Result<ConversationPhase, CacheError> {
    let stored = cache.get(&keys::phase(linked_id)).await?;
    Ok(stored.and_then(|s| phase_from_name(&s)).unwrap_or(ConversationPhase::StartGreeting))
}

pub async fn save_phase(cache: &Arc<dyn SharedCache>, linked_id: &str, phase: ConversationPhase) -> Result<(), CacheError> {
    cache.set_ex(&keys::phase(linked_id), phase_name(phase), ttl::PHASE).await
}
