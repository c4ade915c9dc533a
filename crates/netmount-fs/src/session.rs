//! Session lifecycle.
//!
//! One task per connection. On entry the session acquires its user's watch,
//! announces the tree snapshot and capacity in a hello message, then loops:
//! watcher deltas become sync pushes, inbound text becomes either a stream
//! frame or a request. Unparsable input is logged and dropped; only the
//! transport closing ends the loop.

use std::sync::Arc;

use tokio::sync::mpsc;

use netmount_types::{FsResult, Hello, Request, StreamFrame, SyncMessage};

use crate::ops::{self, OpContext};
use crate::quota;
use crate::sandbox::Sandbox;
use crate::transfer::TransferTable;
use crate::user::User;
use crate::watch::{Subscription, WatchManager};

/// Run one session over a pair of text channels until the inbound side
/// closes. The caller owns transport and authentication; this function owns
/// everything filesystem-side.
pub async fn run_session(
    user: User,
    manager: WatchManager,
    outbound: mpsc::UnboundedSender<String>,
    mut inbound: mpsc::UnboundedReceiver<String>,
) -> FsResult<()> {
    let sandbox = Sandbox::new(user.root());
    let mut subscription = manager.acquire(&user).await?;
    let Some(mut deltas) = subscription.take_deltas() else {
        subscription.close().await;
        return Ok(());
    };
    let transfers = Arc::new(TransferTable::new(outbound.clone()));

    let hello = Hello::new(subscription.initial_contents(), quota::capacity(&user).await);
    if outbound.send(hello.encode()).is_err() {
        subscription.close().await;
        return Ok(());
    }
    tracing::info!(user = %user.name(), root = %user.root().display(), "session opened");

    loop {
        tokio::select! {
            delta = deltas.recv() => {
                let Some((path, attrs)) = delta else {
                    break;
                };
                let capacity = quota::capacity(&user).await;
                let sync = SyncMessage::new(path, attrs.as_ref(), capacity);
                if outbound.send(sync.encode()).is_err() {
                    break;
                }
            }
            message = inbound.recv() => {
                let Some(text) = message else {
                    break;
                };
                handle_message(&text, &user, &sandbox, &subscription, &transfers, &outbound).await;
            }
        }
    }

    subscription.close().await;
    tracing::info!(user = %user.name(), "session closed");
    Ok(())
}

/// Route one inbound message. A `kind` field marks a stream frame; anything
/// else is treated as a request envelope.
async fn handle_message(
    text: &str,
    user: &User,
    sandbox: &Sandbox,
    subscription: &Subscription,
    transfers: &Arc<TransferTable>,
    outbound: &mpsc::UnboundedSender<String>,
) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        tracing::debug!(user = %user.name(), "dropping unparsable message");
        return;
    };
    if value.get("kind").is_some() {
        transfers.handle_frame(StreamFrame::from_value(&value)).await;
        return;
    }
    match serde_json::from_value::<Request>(value) {
        Ok(request) => {
            let ctx = OpContext {
                user,
                sandbox,
                subscription,
                transfers: transfers.as_ref(),
            };
            let reply = ops::dispatch(&request, &ctx).await;
            let _ = outbound.send(reply.encode());
        }
        Err(error) => {
            tracing::debug!(user = %user.name(), %error, "dropping malformed request");
        }
    }
}
