//! Minimal reference dialogue script: collects the caller's RUT, confirms
//! it, and says goodbye. Plugged into `CallEngine` through `DomainPort`;
//! a real deployment swaps this module for its own clinic triage script
//! without touching anything upstream of the port.

use callcore_domain::{Action, DomainContext, DomainEventWire, DomainPort, DomainResult, InterruptPolicy};

pub struct ClinicDomain;

impl DomainPort for ClinicDomain {
    fn handle(&self, ctx: &DomainContext) -> DomainResult {
        match ctx.event {
            DomainEventWire::Init => DomainResult {
                action: Some(Action::PlayAudio {
                    audio: "sound:greeting".to_string(),
                    interrupt_policy: InterruptPolicy::NonInterruptible,
                }),
                next_phase: Some("LISTEN_RUT".to_string()),
                ..Default::default()
            },
            DomainEventWire::Turn => {
                let phase = ctx.state["phase"].as_str().unwrap_or("");
                match phase {
                    "LISTEN_RUT" => DomainResult {
                        action: Some(Action::SayText {
                            text: format!("Confirmo su rut: {}", ctx.transcript.clone().unwrap_or_default()),
                            interrupt_policy: InterruptPolicy::Interruptible,
                        }),
                        next_phase: Some("CONFIRM".to_string()),
                        ..Default::default()
                    },
                    "CONFIRM" => DomainResult {
                        action: Some(Action::SayText {
                            text: "Gracias, hasta luego.".to_string(),
                            interrupt_policy: InterruptPolicy::NonInterruptible,
                        }),
                        next_phase: Some("GOODBYE".to_string()),
                        should_hangup: true,
                        ..Default::default()
                    },
                    _ => DomainResult {
                        action: Some(Action::SayText {
                            text: "No entendi, puede repetir.".to_string(),
                            interrupt_policy: InterruptPolicy::Interruptible,
                        }),
                        ..Default::default()
                    },
                }
            }
            DomainEventWire::NoInput => DomainResult {
                should_hangup: true,
                action: Some(Action::Hangup { reason: Some("no_input".to_string()) }),
                ..Default::default()
            },
        }
    }
}
