//! Screen-to-screen workflow on top of the session core.
//!
//! Functions here take plain ids instead of teloxide updates so they run the
//! same against the live transport and the recording one.

use anyhow::Result;
use teloxide::types::{ChatId, FileId, MessageId};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::billing::transaction::{PaidRequest, TransactionError};
use crate::generation::GenerationInputs;
use crate::media::aggregator::{Observed, PhotoDecision};
use crate::screens::{self, MenuAction, NavTarget};
use crate::session::menu::MenuView;
use crate::session::recovery::RecoveryAction;
use crate::session::store::Stage;
use crate::state::AppState;
use crate::transport::delete_quietly;

const ALBUM_NOTICE: &str = "📎 Albums are not accepted. Please send a single photo.";
const NEED_PHOTO_NOTICE: &str = "Send a photo first.";
const NO_FUNDS_NOTICE: &str = "❗ Not enough credits for this generation.";
const GENERATION_FAILED: &str = "Generation failed. Try another style or photo.";
const DELIVERY_FAILED: &str = "The picture could not be delivered.";
const REFUND_SUFFIX: &str = " Your credit was returned.";
const UNEXPECTED_FAILURE: &str = "Something went wrong. Please try again.";
const DEFAULT_MODE: &str = "restyle";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackRoute {
    /// The tap hit the menu this session is rendering.
    Current,
    /// No session or a different menu message; needs recovery.
    Unmatched,
}

pub fn classify_callback(
    state: &AppState,
    chat_id: ChatId,
    user_id: i64,
    message_id: MessageId,
) -> CallbackRoute {
    let current = state
        .sessions
        .snapshot(user_id)
        .filter(|session| session.fields.menu_chat_id == Some(chat_id))
        .and_then(|session| session.fields.menu_message_id);
    if current == Some(message_id) {
        CallbackRoute::Current
    } else {
        CallbackRoute::Unmatched
    }
}

async fn render(state: &AppState, chat_id: ChatId, user_id: i64, view: MenuView) -> Result<()> {
    state.menu.render_menu(chat_id, user_id, &view).await?;
    Ok(())
}

/// `/start`: fresh session, funds account, and a new menu at the bottom of the chat.
pub async fn start_session(state: &AppState, chat_id: ChatId, user_id: i64) -> Result<()> {
    if !state.sessions.try_begin_start(user_id) {
        info!(user_id, "Ignoring /start while another start is running");
        return Ok(());
    }
    let result = open_main_menu(state, chat_id, user_id).await;
    state.sessions.finish_start(user_id);
    result
}

async fn open_main_menu(state: &AppState, chat_id: ChatId, user_id: i64) -> Result<()> {
    if state
        .db
        .ensure_user(user_id, state.settings.starting_credits)
        .await?
    {
        info!(
            target: "bot.audit",
            "event=account_opened user_id={} credits={}",
            user_id,
            state.settings.starting_credits
        );
    }
    state.sessions.reset(user_id, Stage::Root);
    let balance = state.db.get_balance(user_id).await?;
    render(
        state,
        chat_id,
        user_id,
        screens::main_menu(balance, None).recreated(true),
    )
    .await
}

pub async fn show_help(state: &AppState, chat_id: ChatId, user_id: i64) -> Result<()> {
    render(state, chat_id, user_id, screens::help_menu().recreated(true)).await
}

pub async fn show_balance(state: &AppState, chat_id: ChatId, user_id: i64) -> Result<()> {
    let balance = state.db.get_balance(user_id).await?;
    let view = screens::balance_menu(balance, state.settings.generation_cost, None);
    render(state, chat_id, user_id, view.recreated(true)).await
}

/// Recovers a tap on a menu the session does not know; returns the notice for the tap.
pub async fn recover_interaction(
    state: &AppState,
    chat_id: ChatId,
    user_id: i64,
    message_id: MessageId,
) -> Result<&'static str> {
    let action = state
        .recovery
        .handle_unmatched_interaction(chat_id, user_id, message_id)
        .await?;
    if let RecoveryAction::Refreshed { .. } = action {
        info!(
            target: "bot.audit",
            "event=menu_recovered chat_id={} user_id={}",
            chat_id.0,
            user_id
        );
    }
    Ok(action.notice())
}

pub async fn handle_menu_action(
    state: &AppState,
    chat_id: ChatId,
    user_id: i64,
    action: MenuAction,
) -> Result<()> {
    debug!(user_id, ?action, "Menu action");
    match action {
        MenuAction::Mode(code) => choose_mode(state, chat_id, user_id, &code).await,
        MenuAction::Category(code) => choose_category(state, chat_id, user_id, &code).await,
        MenuAction::Style(code) => generate(state, chat_id, user_id, &code).await,
        MenuAction::Nav(target) => navigate(state, chat_id, user_id, target).await,
    }
}

async fn choose_mode(state: &AppState, chat_id: ChatId, user_id: i64, code: &str) -> Result<()> {
    let Some(mode) = screens::find_mode(code) else {
        return navigate(state, chat_id, user_id, NavTarget::Main).await;
    };
    state.sessions.reset(user_id, Stage::AwaitingPhoto);
    state
        .sessions
        .update(user_id, |session| session.fields.mode = Some(mode.code.to_string()));
    render(state, chat_id, user_id, screens::upload_prompt(mode, None)).await
}

async fn choose_category(
    state: &AppState,
    chat_id: ChatId,
    user_id: i64,
    code: &str,
) -> Result<()> {
    let Some(category) = screens::find_category(code) else {
        return show_categories(state, chat_id, user_id).await;
    };
    let has_photo = state.sessions.update(user_id, |session| {
        if session.fields.reference_photo.is_none() {
            return false;
        }
        session.fields.category = Some(category.code.to_string());
        session.stage = Stage::ChoosingStyle;
        true
    });
    if !has_photo {
        return prompt_for_photo(state, chat_id, user_id, Some(NEED_PHOTO_NOTICE)).await;
    }
    render(state, chat_id, user_id, screens::styles_menu(category, None)).await
}

async fn navigate(state: &AppState, chat_id: ChatId, user_id: i64, target: NavTarget) -> Result<()> {
    match target {
        NavTarget::Main => {
            state.sessions.reset(user_id, Stage::Root);
            let balance = state.db.get_balance(user_id).await?;
            render(state, chat_id, user_id, screens::main_menu(balance, None)).await
        }
        NavTarget::Upload => prompt_for_photo(state, chat_id, user_id, None).await,
        NavTarget::Categories => show_categories(state, chat_id, user_id).await,
        NavTarget::Styles => {
            let category = state.sessions.update(user_id, |session| {
                session.fields.reference_photo.as_ref()?;
                let category = session
                    .fields
                    .category
                    .as_deref()
                    .and_then(screens::find_category)?;
                session.stage = Stage::ChoosingStyle;
                Some(category)
            });
            match category {
                Some(category) => {
                    render(state, chat_id, user_id, screens::styles_menu(category, None)).await
                }
                None => show_categories(state, chat_id, user_id).await,
            }
        }
        NavTarget::Balance => {
            let balance = state.db.get_balance(user_id).await?;
            let view = screens::balance_menu(balance, state.settings.generation_cost, None);
            render(state, chat_id, user_id, view).await
        }
        NavTarget::Help => render(state, chat_id, user_id, screens::help_menu()).await,
    }
}

async fn show_categories(state: &AppState, chat_id: ChatId, user_id: i64) -> Result<()> {
    let has_photo = state.sessions.update(user_id, |session| {
        if session.fields.reference_photo.is_none() {
            return false;
        }
        session.stage = Stage::ChoosingCategory;
        true
    });
    if !has_photo {
        return prompt_for_photo(state, chat_id, user_id, Some(NEED_PHOTO_NOTICE)).await;
    }
    render(state, chat_id, user_id, screens::categories_menu(None)).await
}

async fn prompt_for_photo(
    state: &AppState,
    chat_id: ChatId,
    user_id: i64,
    notice: Option<&str>,
) -> Result<()> {
    let mode_code = state.sessions.update(user_id, |session| {
        session.stage = Stage::AwaitingPhoto;
        session.fields.reference_photo = None;
        session.fields.category = None;
        session.fields.style = None;
        session
            .fields
            .mode
            .get_or_insert_with(|| DEFAULT_MODE.to_string())
            .clone()
    });
    let mode = screens::find_mode(&mode_code)
        .or_else(|| screens::find_mode(DEFAULT_MODE))
        .ok_or_else(|| anyhow::anyhow!("no workflow modes configured"))?;
    render(state, chat_id, user_id, screens::upload_prompt(mode, notice)).await
}

/// Routes one inbound photo; grouped photos go through the album aggregator first.
pub async fn receive_photo(
    state: &AppState,
    chat_id: ChatId,
    user_id: i64,
    message_id: MessageId,
    file_id: FileId,
    group_id: Option<&str>,
) -> Result<()> {
    let Some(group_id) = group_id else {
        return accept_photo(state, chat_id, user_id, message_id, file_id).await;
    };

    match state
        .media_groups
        .observe(user_id, group_id, message_id)
        .await
    {
        Observed::Collector(batch) => match PhotoDecision::from_batch(batch) {
            Some(PhotoDecision::Accept(_)) => {
                accept_photo(state, chat_id, user_id, message_id, file_id).await
            }
            Some(PhotoDecision::RejectAlbum(members)) => {
                reject_album(state, chat_id, user_id, members).await
            }
            None => Ok(()),
        },
        Observed::Joined => Ok(()),
        Observed::Late => {
            delete_quietly(state.transport.as_ref(), chat_id, message_id, "late album member").await;
            Ok(())
        }
    }
}

async fn accept_photo(
    state: &AppState,
    chat_id: ChatId,
    user_id: i64,
    message_id: MessageId,
    file_id: FileId,
) -> Result<()> {
    let accepted = state.sessions.update(user_id, |session| {
        if session.stage != Stage::AwaitingPhoto {
            return false;
        }
        session.fields.reference_photo = Some(file_id);
        session.fields.category = None;
        session.fields.style = None;
        session.stage = Stage::ChoosingCategory;
        true
    });
    if !accepted {
        debug!(user_id, message_id = message_id.0, "Photo outside the upload step");
        delete_quietly(state.transport.as_ref(), chat_id, message_id, "unexpected photo").await;
        return Ok(());
    }

    info!(user_id, message_id = message_id.0, "Reference photo accepted");
    render(
        state,
        chat_id,
        user_id,
        screens::categories_menu(None).recreated(true),
    )
    .await
}

async fn reject_album(
    state: &AppState,
    chat_id: ChatId,
    user_id: i64,
    members: Vec<MessageId>,
) -> Result<()> {
    info!(user_id, size = members.len(), "Rejecting album upload");
    for message_id in &members {
        delete_quietly(state.transport.as_ref(), chat_id, *message_id, "album member").await;
    }
    if state.sessions.stage(user_id) == Some(Stage::AwaitingPhoto) {
        prompt_for_photo(state, chat_id, user_id, Some(ALBUM_NOTICE)).await?;
    }
    Ok(())
}

struct GenerationPlan {
    photo: FileId,
    mode_code: String,
}

/// Downloads the photo in-process; the file URL embeds the bot token and never leaves here.
async fn load_reference_image(state: &AppState, file_id: &FileId) -> Result<String> {
    let url = state.transport.file_url(file_id).await?;
    let photo = state.fetcher.fetch(&url).await?;
    Ok(photo.to_data_uri())
}

fn failure_notice(base: &str, refunded: bool) -> String {
    if refunded {
        format!("{base}{REFUND_SUFFIX}")
    } else {
        base.to_string()
    }
}

async fn generate(state: &AppState, chat_id: ChatId, user_id: i64, style_code: &str) -> Result<()> {
    let Some((category, style)) = screens::find_style(style_code) else {
        return navigate(state, chat_id, user_id, NavTarget::Styles).await;
    };

    // Claimed before any await so a second tap on the same button finds `Generating`.
    let plan = state.sessions.update(user_id, |session| {
        if session.stage != Stage::ChoosingStyle {
            return None;
        }
        let photo = session.fields.reference_photo.clone()?;
        session.stage = Stage::Generating;
        session.fields.category = Some(category.code.to_string());
        session.fields.style = Some(style.code.to_string());
        Some(GenerationPlan {
            photo,
            mode_code: session
                .fields
                .mode
                .clone()
                .unwrap_or_else(|| DEFAULT_MODE.to_string()),
        })
    });
    let Some(plan) = plan else {
        info!(user_id, style = style.code, "Ignoring style tap outside the style step");
        return Ok(());
    };
    let mode = screens::find_mode(&plan.mode_code)
        .or_else(|| screens::find_mode(DEFAULT_MODE))
        .ok_or_else(|| anyhow::anyhow!("no workflow modes configured"))?;

    if let Err(err) = render(state, chat_id, user_id, screens::generating(style)).await {
        warn!(user_id, "Could not show the generating screen: {err:#}");
    }

    let reference_image = match load_reference_image(state, &plan.photo).await {
        Ok(image) => image,
        Err(err) => {
            warn!(user_id, "Could not load the reference photo: {err:#}");
            state.sessions.update(user_id, |session| session.stage = Stage::ChoosingStyle);
            let balance = state.db.get_balance(user_id).await?;
            let view = screens::failure_menu(UNEXPECTED_FAILURE, balance);
            return render(state, chat_id, user_id, view).await;
        }
    };

    let correlation_id = Uuid::new_v4().to_string();
    let request = PaidRequest {
        correlation_id: correlation_id.clone(),
        user_id,
        chat_id,
        cost: state.settings.generation_cost,
        exempt: state.settings.is_exempt(user_id),
        style_code: Some(style.code.to_string()),
    };
    let inputs = GenerationInputs {
        correlation_id,
        mode_code: mode.code.to_string(),
        style_code: style.code.to_string(),
        prompt: screens::generation_prompt(mode, style),
        reference_image,
    };
    let generator = state.generator.clone();
    let caption = format!("{} · {}", category.title, style.title);

    let outcome = state
        .transactions
        .run_paid_operation(&request, Some(&caption), move || async move {
            generator.generate(&inputs).await
        })
        .await;

    let (stage, notice) = match &outcome {
        Ok(delivery) => {
            info!(
                user_id,
                message_id = delivery.message_id.0,
                strategy = delivery.strategy.as_str(),
                charged = delivery.charged,
                "Generated picture delivered"
            );
            (Stage::Result, None)
        }
        Err(TransactionError::InsufficientFunds { .. }) => (Stage::Root, None),
        Err(TransactionError::GenerationFailed { refunded, .. }) => {
            (Stage::Result, Some(failure_notice(GENERATION_FAILED, *refunded)))
        }
        Err(TransactionError::DeliveryFailed { refunded, .. }) => {
            (Stage::Result, Some(failure_notice(DELIVERY_FAILED, *refunded)))
        }
        Err(TransactionError::DuplicateCompletion { correlation_id }) => {
            info!(user_id, correlation_id = %correlation_id, "Duplicate completion suppressed");
            (Stage::Result, None)
        }
        Err(TransactionError::Store(err)) => {
            warn!(user_id, "Paid generation failed on the funds store: {err:#}");
            (Stage::Result, Some(UNEXPECTED_FAILURE.to_string()))
        }
    };
    state.sessions.update(user_id, |session| session.stage = stage);

    let balance = state.db.get_balance(user_id).await?;
    let view = match (&outcome, notice) {
        (Err(TransactionError::InsufficientFunds { balance, cost }), _) => {
            screens::balance_menu(*balance, *cost, Some(NO_FUNDS_NOTICE))
        }
        (_, Some(notice)) => screens::failure_menu(&notice, balance),
        // The delivered photo sits below the menu; move the menu under it.
        (Ok(_), None) => screens::result_menu(balance).recreated(true),
        (Err(_), None) => screens::result_menu(balance),
    };
    render(state, chat_id, user_id, view).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::db::database::Database;
    use crate::generation::scripted::ScriptedGenerator;
    use crate::generation::GenerationError;
    use crate::media::fetch::{ArtifactFetcher, FetchError, FetchedArtifact};
    use crate::state::{Collaborators, Timings, WorkflowSettings};
    use crate::transport::recording::{Call, RecordingTransport};

    const CHAT: ChatId = ChatId(42);
    const USER: i64 = 42;

    const JPEG_HEADER: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0];

    /// Serves every reference as a tiny JPEG and remembers what was asked for.
    #[derive(Default)]
    struct PhotoFetcher {
        requested: parking_lot::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl ArtifactFetcher for PhotoFetcher {
        async fn fetch(&self, reference: &str) -> Result<FetchedArtifact, FetchError> {
            self.requested.lock().push(reference.to_string());
            Ok(FetchedArtifact::from_bytes(JPEG_HEADER.to_vec()))
        }
    }

    struct Harness {
        state: AppState,
        transport: Arc<RecordingTransport>,
        generator: Arc<ScriptedGenerator>,
        fetcher: Arc<PhotoFetcher>,
    }

    async fn harness(generator: ScriptedGenerator, starting_credits: i64) -> Harness {
        let db = Database::in_memory().await.unwrap();
        let transport = Arc::new(RecordingTransport::new(9000));
        let generator = Arc::new(generator);
        let fetcher = Arc::new(PhotoFetcher::default());
        let state = AppState::assemble(
            db,
            Collaborators {
                transport: transport.clone(),
                generator: generator.clone(),
                fetcher: fetcher.clone(),
            },
            WorkflowSettings {
                generation_cost: 1,
                starting_credits,
                exempt_user_ids: vec![7],
                admin_user_ids: vec![1],
            },
            Timings {
                media_group_window: Duration::from_millis(50),
                media_group_retention: Duration::from_secs(30),
                generation_timeout: Duration::from_secs(5),
            },
            None,
        );
        Harness {
            state,
            transport,
            generator,
            fetcher,
        }
    }

    async fn walk_to_styles(state: &AppState) {
        start_session(state, CHAT, USER).await.unwrap();
        handle_menu_action(state, CHAT, USER, MenuAction::Mode("restyle".to_string()))
            .await
            .unwrap();
        receive_photo(state, CHAT, USER, MessageId(100), FileId("ref".to_string()), None)
            .await
            .unwrap();
        handle_menu_action(state, CHAT, USER, MenuAction::Category("art".to_string()))
            .await
            .unwrap();
    }

    async fn screen_code(state: &AppState) -> String {
        state.db.get_chat_menu(CHAT.0).await.unwrap().unwrap().screen_code
    }

    #[tokio::test]
    async fn full_walk_delivers_one_artifact_and_charges_once() {
        let h = harness(ScriptedGenerator::returning("https://cdn.test/out.png"), 3).await;
        walk_to_styles(&h.state).await;
        assert_eq!(h.state.sessions.stage(USER), Some(Stage::ChoosingStyle));

        handle_menu_action(&h.state, CHAT, USER, MenuAction::Style("oil".to_string()))
            .await
            .unwrap();

        assert_eq!(h.state.db.get_balance(USER).await.unwrap(), 2);
        assert_eq!(h.transport.sent_photos().len(), 1);
        assert_eq!(h.state.sessions.stage(USER), Some(Stage::Result));
        assert_eq!(screen_code(&h.state).await, screens::SCREEN_RESULT);
        let inputs = h.generator.calls();
        assert_eq!(inputs.len(), 1);
        assert!(inputs[0].reference_image.starts_with("data:image/jpeg;base64,"));
        assert!(!inputs[0].reference_image.contains("files.test"));
        assert_eq!(*h.fetcher.requested.lock(), vec!["https://files.test/ref".to_string()]);
        assert_eq!(inputs[0].style_code, "oil");
        let record = h.state.db.get_chat_menu(CHAT.0).await.unwrap().unwrap();
        assert_eq!(
            record.message_id(),
            h.state.sessions.menu_message_id(USER, CHAT),
            "menu stores disagree"
        );
    }

    #[tokio::test]
    async fn duplicate_style_tap_is_dropped() {
        let generator = ScriptedGenerator::returning("https://cdn.test/out.png");
        generator.push(Ok("https://cdn.test/second.png".to_string()));
        let h = harness(generator, 3).await;
        walk_to_styles(&h.state).await;

        let tap = || handle_menu_action(&h.state, CHAT, USER, MenuAction::Style("oil".to_string()));
        let (first, second) = tokio::join!(tap(), tap());
        first.unwrap();
        second.unwrap();

        assert_eq!(h.generator.calls().len(), 1);
        assert_eq!(h.state.db.get_balance(USER).await.unwrap(), 2);
        assert_eq!(h.transport.sent_photos().len(), 1);
    }

    #[tokio::test]
    async fn failed_generation_refunds_and_keeps_photo_for_retry() {
        let h = harness(
            ScriptedGenerator::failing(GenerationError::Backend("status 502".to_string())),
            1,
        )
        .await;
        walk_to_styles(&h.state).await;

        handle_menu_action(&h.state, CHAT, USER, MenuAction::Style("oil".to_string()))
            .await
            .unwrap();

        assert_eq!(h.state.db.get_balance(USER).await.unwrap(), 1);
        assert!(h.transport.sent_photos().is_empty());
        let session = h.state.sessions.snapshot(USER).unwrap();
        assert_eq!(session.stage, Stage::Result);
        assert!(session.fields.reference_photo.is_some());

        handle_menu_action(&h.state, CHAT, USER, MenuAction::Nav(NavTarget::Styles))
            .await
            .unwrap();
        assert_eq!(h.state.sessions.stage(USER), Some(Stage::ChoosingStyle));
        assert_eq!(screen_code(&h.state).await, screens::SCREEN_STYLES);
    }

    #[test]
    fn refund_is_only_mentioned_when_applied() {
        assert!(failure_notice(GENERATION_FAILED, true).ends_with("Your credit was returned."));
        assert_eq!(failure_notice(DELIVERY_FAILED, false), DELIVERY_FAILED);
    }

    #[tokio::test]
    async fn empty_wallet_shows_balance_screen_without_generating() {
        let h = harness(ScriptedGenerator::returning("https://cdn.test/out.png"), 0).await;
        walk_to_styles(&h.state).await;

        handle_menu_action(&h.state, CHAT, USER, MenuAction::Style("oil".to_string()))
            .await
            .unwrap();

        assert!(h.generator.calls().is_empty());
        assert_eq!(screen_code(&h.state).await, screens::SCREEN_BALANCE);
        assert_eq!(h.state.sessions.stage(USER), Some(Stage::Root));
    }

    #[tokio::test]
    async fn album_is_rejected_and_every_member_deleted() {
        let h = harness(ScriptedGenerator::new(), 3).await;
        start_session(&h.state, CHAT, USER).await.unwrap();
        handle_menu_action(&h.state, CHAT, USER, MenuAction::Mode("avatar".to_string()))
            .await
            .unwrap();
        h.transport.clear_calls();

        let photo = |id: i32| {
            receive_photo(
                &h.state,
                CHAT,
                USER,
                MessageId(id),
                FileId(format!("f{id}")),
                Some("g1"),
            )
        };
        let (a, b, c) = tokio::join!(photo(5001), photo(5002), photo(5003));
        a.unwrap();
        b.unwrap();
        c.unwrap();

        assert_eq!(h.transport.deleted_ids(), vec![5001, 5002, 5003]);
        let session = h.state.sessions.snapshot(USER).unwrap();
        assert_eq!(session.stage, Stage::AwaitingPhoto);
        assert!(session.fields.reference_photo.is_none());
        match h.transport.calls().last() {
            Some(Call::EditText { text, .. }) => assert!(text.contains(ALBUM_NOTICE)),
            other => panic!("expected the upload prompt to be re-rendered, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn single_member_group_is_accepted_as_a_photo() {
        let h = harness(ScriptedGenerator::new(), 3).await;
        start_session(&h.state, CHAT, USER).await.unwrap();
        handle_menu_action(&h.state, CHAT, USER, MenuAction::Mode("restyle".to_string()))
            .await
            .unwrap();

        receive_photo(&h.state, CHAT, USER, MessageId(300), FileId("solo".to_string()), Some("g2"))
            .await
            .unwrap();

        let session = h.state.sessions.snapshot(USER).unwrap();
        assert_eq!(session.stage, Stage::ChoosingCategory);
        assert_eq!(session.fields.reference_photo, Some(FileId("solo".to_string())));
        assert_eq!(screen_code(&h.state).await, screens::SCREEN_CATEGORIES);
    }

    #[tokio::test]
    async fn photo_outside_upload_step_is_removed() {
        let h = harness(ScriptedGenerator::new(), 3).await;
        start_session(&h.state, CHAT, USER).await.unwrap();
        h.transport.clear_calls();

        receive_photo(&h.state, CHAT, USER, MessageId(77), FileId("x".to_string()), None)
            .await
            .unwrap();

        assert_eq!(h.transport.calls(), vec![Call::Delete { chat_id: CHAT.0, message_id: 77 }]);
        assert_eq!(h.state.sessions.stage(USER), Some(Stage::Root));
    }

    #[tokio::test]
    async fn start_replaces_the_previous_menu() {
        let h = harness(ScriptedGenerator::new(), 3).await;
        start_session(&h.state, CHAT, USER).await.unwrap();
        start_session(&h.state, CHAT, USER).await.unwrap();

        assert_eq!(h.transport.created_messages(), 2);
        assert_eq!(h.transport.deleted_ids(), vec![9000]);
        assert_eq!(h.state.sessions.menu_message_id(USER, CHAT), Some(MessageId(9001)));
        assert_eq!(h.state.db.get_balance(USER).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn menu_in_another_chat_never_touches_the_private_menu() {
        let h = harness(ScriptedGenerator::new(), 3).await;
        let group = ChatId(-100123);
        start_session(&h.state, CHAT, USER).await.unwrap();
        h.transport.clear_calls();

        navigate(&h.state, group, USER, NavTarget::Help).await.unwrap();
        start_session(&h.state, group, USER).await.unwrap();

        let touched: Vec<(i64, Option<i32>)> = h
            .transport
            .calls()
            .iter()
            .map(|call| match call {
                Call::SendText { chat_id, message_id, .. }
                | Call::SendPhoto { chat_id, message_id, .. } => (*chat_id, *message_id),
                Call::EditText { chat_id, message_id, .. }
                | Call::EditCaption { chat_id, message_id, .. }
                | Call::Delete { chat_id, message_id } => (*chat_id, Some(*message_id)),
            })
            .collect();
        assert_eq!(
            touched,
            vec![(group.0, Some(9001)), (group.0, Some(9002)), (group.0, Some(9001))]
        );
        assert_eq!(h.transport.deleted_ids(), vec![9001]);
        let private = h.state.db.get_chat_menu(CHAT.0).await.unwrap().unwrap();
        assert_eq!(private.menu_message_id, Some(9000));
        assert_eq!(classify_callback(&h.state, CHAT, USER, MessageId(9000)), CallbackRoute::Unmatched);
    }

    #[tokio::test]
    async fn restart_recovers_on_the_recorded_menu() {
        let h = harness(ScriptedGenerator::new(), 3).await;
        walk_to_styles(&h.state).await;
        let menu_id = h.state.sessions.menu_message_id(USER, CHAT).unwrap();

        // Same database, fresh volatile state.
        let restarted = AppState::assemble(
            h.state.db.clone(),
            Collaborators {
                transport: h.transport.clone(),
                generator: h.generator.clone(),
                fetcher: h.fetcher.clone(),
            },
            h.state.settings.clone(),
            Timings {
                media_group_window: Duration::from_millis(50),
                media_group_retention: Duration::from_secs(30),
                generation_timeout: Duration::from_secs(5),
            },
            None,
        );
        assert_eq!(classify_callback(&restarted, CHAT, USER, menu_id), CallbackRoute::Unmatched);

        let notice = recover_interaction(&restarted, CHAT, USER, menu_id).await.unwrap();

        assert_eq!(notice, crate::session::recovery::REFRESHED_NOTICE);
        assert_eq!(classify_callback(&restarted, CHAT, USER, menu_id), CallbackRoute::Current);
        assert_eq!(restarted.sessions.stage(USER), Some(Stage::Root));
        assert_eq!(screen_code(&restarted).await, screens::SCREEN_MAIN);
    }

    #[tokio::test]
    async fn exempt_user_generates_for_free() {
        let h = harness(ScriptedGenerator::returning("https://cdn.test/out.png"), 0).await;
        let chat = ChatId(7);
        start_session(&h.state, chat, 7).await.unwrap();
        handle_menu_action(&h.state, chat, 7, MenuAction::Mode("restyle".to_string()))
            .await
            .unwrap();
        receive_photo(&h.state, chat, 7, MessageId(1), FileId("p".to_string()), None)
            .await
            .unwrap();
        handle_menu_action(&h.state, chat, 7, MenuAction::Category("retro".to_string()))
            .await
            .unwrap();

        handle_menu_action(&h.state, chat, 7, MenuAction::Style("pixel".to_string()))
            .await
            .unwrap();

        assert_eq!(h.transport.sent_photos().len(), 1);
        assert_eq!(h.state.db.get_balance(7).await.unwrap(), 0);
    }
}
