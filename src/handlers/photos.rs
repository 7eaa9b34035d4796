use anyhow::Result;
use teloxide::prelude::*;

use crate::handlers::workflow;
use crate::state::AppState;
use crate::utils::timing::start_update_timer;

/// Spawned per update: album members must be able to reach the aggregator while
/// the first member's collector is still waiting.
pub async fn photo_handler(state: AppState, message: Message) -> Result<()> {
    let Some(user_id) = message
        .from
        .as_ref()
        .and_then(|user| i64::try_from(user.id.0).ok())
    else {
        return Ok(());
    };
    let Some(photo) = message.photo().and_then(|sizes| sizes.last()) else {
        return Ok(());
    };
    let mut timer = start_update_timer("photo", &message);

    let group_id = message.media_group_id().map(|group| group.0.clone());
    let result = workflow::receive_photo(
        &state,
        message.chat.id,
        user_id,
        message.id,
        photo.file.id.clone(),
        group_id.as_deref(),
    )
    .await;
    if let Err(err) = &result {
        timer.mark_status("error", Some(format!("{err:#}")));
    }
    result
}
