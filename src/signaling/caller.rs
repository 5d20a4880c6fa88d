use super::{CallLoop, Negotiated, Setup, SignalingController};
use crate::error::Result;
use crate::peer::state::{CallState, Role};
use crate::session::CandidateSide;
use tracing::{debug, info};

/// Caller side: capture, create the session, publish the offer and start
/// listening for the answer and the callee's candidates.
pub(super) async fn start(ctl: &SignalingController) -> Result<CallLoop> {
    let media = ctl.acquire_media().await?;
    let mut setup = Setup::new(media);
    match publish_offer(ctl, &mut setup).await {
        Ok(negotiated) => ctl.finish(Role::Caller, setup, negotiated),
        Err(e) => {
            setup.abort().await;
            Err(e)
        }
    }
}

async fn publish_offer(ctl: &SignalingController, setup: &mut Setup) -> Result<Negotiated> {
    let call_id = ctl.sessions.create_session().await?;
    ctl.set_state(CallState::SessionCreated);
    info!(call_id = %call_id, "call session created");

    let events = setup.connect(ctl.transports.as_ref()).await?;
    let transport = setup.transport()?;

    let offer = transport.create_offer().await?;
    transport.set_local_description(offer.clone()).await?;
    ctl.sessions.write_offer(&call_id, &offer).await?;
    ctl.set_state(CallState::OfferPublished);
    debug!(call_id = %call_id, "offer published");

    let session_updates = ctl.sessions.subscribe_session(&call_id).await?;
    let remote_candidates = ctl
        .sessions
        .subscribe_candidates(&call_id, CandidateSide::Answer)
        .await?;
    ctl.set_state(CallState::AwaitingAnswer);

    Ok(Negotiated {
        call_id,
        events,
        session_updates: Some(session_updates),
        remote_candidates,
    })
}
