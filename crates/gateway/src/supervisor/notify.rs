//! Post-handshake announcements: the welcome message to the linked number
//! and a bounded fan-out to the admin list.

use futures_util::stream::{self, StreamExt};

use wg_domain::Identity;

use super::Connection;

/// Delivery tally for one fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NotifyReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Send `text` to every recipient with at most `concurrency` sends in
/// flight.  Individual failures are logged and counted, never propagated.
pub async fn notify_all(
    connection: &Connection,
    recipients: Vec<Identity>,
    text: &str,
    concurrency: usize,
) -> NotifyReport {
    stream::iter(recipients)
        .map(|recipient| async move {
            let result = connection.send_text(&recipient.jid(), text).await;
            (recipient, result)
        })
        .buffer_unordered(concurrency.max(1))
        .fold(NotifyReport::default(), |mut report, (recipient, result)| async move {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(recipient = %recipient, error = %e, "admin notification failed");
                    report.failed += 1;
                }
            }
            report
        })
        .await
}

/// Welcome the newly linked number, then tell the admins about it.
pub(crate) async fn announce(
    connection: Connection,
    welcome: String,
    admins: Vec<Identity>,
    bot_name: String,
    concurrency: usize,
) {
    let identity = connection.identity().clone();
    if let Err(e) = connection.send_text(&identity.jid(), &welcome).await {
        tracing::warn!(identity = %identity, error = %e, "welcome message failed");
    }

    let recipients: Vec<Identity> = admins.into_iter().filter(|a| *a != identity).collect();
    if recipients.is_empty() {
        return;
    }
    let text = format!("🔔 {bot_name}: new number linked\n\n📱 +{identity}");
    let report = notify_all(&connection, recipients, &text, concurrency).await;
    tracing::info!(
        identity = %identity,
        delivered = report.delivered,
        failed = report.failed,
        "admins notified"
    );
}
