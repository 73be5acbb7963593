// Message purging used by `/config-channels purge-messages` and scheduled
// purge rules.

use chrono::Utc;
use poise::serenity_prelude as serenity;

/// Discord refuses bulk deletes for messages older than this.
const BULK_DELETE_MAX_AGE_SECS: i64 = 14 * 24 * 60 * 60;
const FETCH_PAGE: u8 = 100;

/// Delete up to `limit` of the newest messages in a channel, or everything
/// when `limit` is `None`. Returns how many messages were removed.
pub async fn purge_channel(
    http: &serenity::Http,
    channel_id: serenity::ChannelId,
    limit: Option<u32>,
) -> Result<usize, serenity::Error> {
    let mut deleted = 0usize;
    let mut before: Option<serenity::MessageId> = None;

    loop {
        let remaining = limit.map(|l| (l as usize).saturating_sub(deleted));
        if remaining == Some(0) {
            break;
        }
        let page = remaining.map_or(FETCH_PAGE, |r| r.min(FETCH_PAGE as usize) as u8);

        let mut request = serenity::GetMessages::new().limit(page);
        if let Some(before) = before {
            request = request.before(before);
        }
        let messages = channel_id.messages(http, request).await?;
        let Some(oldest) = messages.last() else {
            break;
        };
        before = Some(oldest.id);
        let fetched = messages.len();

        let cutoff = Utc::now().timestamp() - BULK_DELETE_MAX_AGE_SECS;
        let (recent, old): (Vec<_>, Vec<_>) = messages
            .iter()
            .partition(|m| m.timestamp.unix_timestamp() > cutoff);

        match recent.len() {
            0 => {}
            1 => channel_id.delete_message(http, recent[0].id).await?,
            _ => channel_id.delete_messages(http, recent.iter().copied()).await?,
        }
        for message in &old {
            channel_id.delete_message(http, message.id).await?;
        }
        deleted += fetched;

        if fetched < page as usize {
            break;
        }
    }

    tracing::info!(channel_id = channel_id.get(), deleted, "Purged channel");
    Ok(deleted)
}
