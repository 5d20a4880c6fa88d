use super::{CallLoop, Negotiated, Setup, SignalingController};
use crate::config::LateJoinPolicy;
use crate::error::{CallError, Result};
use crate::peer::state::{CallState, Role};
use crate::peer::types::SessionDescription;
use crate::session::{CallId, CandidateSide};
use tracing::{debug, info, warn};

/// Callee side: fetch the offer, capture, answer and start listening for the
/// caller's candidates.
pub(super) async fn join(ctl: &SignalingController, raw_id: &str) -> Result<CallLoop> {
    let call_id = CallId::parse(raw_id)?;
    let session = ctl.sessions.get_session(&call_id).await?;
    let offer = session
        .offer
        .ok_or_else(|| CallError::Signaling(format!("call {call_id} has no offer yet")))?;

    if session.answer.is_some() {
        match ctl.config.late_join {
            LateJoinPolicy::Reject => {
                return Err(CallError::AlreadyAnswered(call_id.to_string()));
            }
            LateJoinPolicy::Overwrite => {
                warn!(call_id = %call_id, "call already answered, overwriting the existing answer");
            }
        }
    }

    let media = ctl.acquire_media().await?;
    let mut setup = Setup::new(media);
    match publish_answer(ctl, &mut setup, call_id, offer).await {
        Ok(negotiated) => ctl.finish(Role::Callee, setup, negotiated),
        Err(e) => {
            setup.abort().await;
            Err(e)
        }
    }
}

async fn publish_answer(
    ctl: &SignalingController,
    setup: &mut Setup,
    call_id: CallId,
    offer: SessionDescription,
) -> Result<Negotiated> {
    let events = setup.connect(ctl.transports.as_ref()).await?;
    let transport = setup.transport()?;

    transport.set_remote_description(offer).await?;
    ctl.counters.remote_description_applied();
    ctl.set_state(CallState::OfferFetched);
    info!(call_id = %call_id, "offer applied as remote description");

    let answer = transport.create_answer().await?;
    transport.set_local_description(answer.clone()).await?;
    ctl.sessions.write_answer(&call_id, &answer).await?;
    ctl.set_state(CallState::AnswerPublished);
    debug!(call_id = %call_id, "answer published");

    let remote_candidates = ctl
        .sessions
        .subscribe_candidates(&call_id, CandidateSide::Offer)
        .await?;

    Ok(Negotiated {
        call_id,
        events,
        session_updates: None,
        remote_candidates,
    })
}
