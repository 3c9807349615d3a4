use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use snafu::{OptionExt, ResultExt, Snafu};

use quill::settings::{SettingsPatch, SettingsState, Theme};
use quill::workspace::{ChatWorkspace, SendOutcome, SkipReason};
use quill::ModelCatalog;
use quill_llm::OpenRouterClient;
use quill_storage::{
    CachedModelRecord, MessageRole, ModelCacheStore, SqliteStorage, StorageError,
};

#[derive(Debug, Clone)]
struct RunnerArgs {
    scenario: Scenario,
    db_path: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Scenario {
    SettingsRoundtrip,
    ChatLifecycle,
    SendSkipWithoutKey,
    CatalogCacheAdopt,
    All,
}

impl Scenario {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "settings_roundtrip" => Some(Self::SettingsRoundtrip),
            "chat_lifecycle" => Some(Self::ChatLifecycle),
            "send_skip_without_key" => Some(Self::SendSkipWithoutKey),
            "catalog_cache_adopt" => Some(Self::CatalogCacheAdopt),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::SettingsRoundtrip => "settings_roundtrip",
            Self::ChatLifecycle => "chat_lifecycle",
            Self::SendSkipWithoutKey => "send_skip_without_key",
            Self::CatalogCacheAdopt => "catalog_cache_adopt",
            Self::All => "all",
        }
    }
}

#[derive(Debug, Snafu)]
enum RunnerError {
    #[snafu(display("missing required --scenario argument"))]
    MissingScenario { stage: &'static str },
    #[snafu(display("missing value for argument '{arg}'"))]
    MissingArgumentValue {
        stage: &'static str,
        arg: &'static str,
    },
    #[snafu(display("unknown scenario '{raw}'"))]
    UnknownScenario { stage: &'static str, raw: String },
    #[snafu(display("unknown argument '{raw}'"))]
    UnknownArgument { stage: &'static str, raw: String },
    #[snafu(display("storage validation failed: {source}"))]
    StorageValidation {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("scenario '{scenario}' failed: {reason}"))]
    ScenarioFailed {
        stage: &'static str,
        scenario: &'static str,
        reason: String,
    },
}

type RunnerResult<T> = Result<T, RunnerError>;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(error) = run().await {
        println!("runner_ok=false");
        eprintln!("runner_error={error}");
        std::process::exit(1);
    }
}

async fn run() -> RunnerResult<()> {
    let args = parse_args(env::args().skip(1))?;
    println!("scenario={}", args.scenario.name());

    match args.scenario {
        Scenario::SettingsRoundtrip => run_settings_roundtrip(&db_path_for(&args)).await,
        Scenario::ChatLifecycle => run_chat_lifecycle(&db_path_for(&args)).await,
        Scenario::SendSkipWithoutKey => run_send_skip_without_key(&db_path_for(&args)).await,
        Scenario::CatalogCacheAdopt => run_catalog_cache_adopt(&db_path_for(&args)).await,
        Scenario::All => {
            run_settings_roundtrip(&temp_db_path("settings")).await?;
            run_chat_lifecycle(&temp_db_path("lifecycle")).await?;
            run_send_skip_without_key(&temp_db_path("send-skip")).await?;
            run_catalog_cache_adopt(&temp_db_path("catalog")).await?;
            println!("all_scenarios_ok=true");
            Ok(())
        }
    }
}

fn parse_args(args: impl IntoIterator<Item = String>) -> RunnerResult<RunnerArgs> {
    let mut scenario = None;
    let mut db_path = None;
    let mut pending = args.into_iter();

    while let Some(argument) = pending.next() {
        match argument.as_str() {
            "--scenario" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-scenario-value",
                    arg: "--scenario",
                })?;

                let parsed = Scenario::parse(&value).context(UnknownScenarioSnafu {
                    stage: "parse-args-scenario",
                    raw: value,
                })?;
                scenario = Some(parsed);
            }
            "--db" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-db-value",
                    arg: "--db",
                })?;
                db_path = Some(value);
            }
            _ => {
                return UnknownArgumentSnafu {
                    stage: "parse-args",
                    raw: argument,
                }
                .fail();
            }
        }
    }

    Ok(RunnerArgs {
        scenario: scenario.context(MissingScenarioSnafu {
            stage: "parse-args-scenario-required",
        })?,
        db_path,
    })
}

fn db_path_for(args: &RunnerArgs) -> String {
    args.db_path
        .clone()
        .unwrap_or_else(|| temp_db_path(args.scenario.name()))
}

fn temp_db_path(label: &str) -> String {
    let file_name = format!("quill-qa-{label}-{}.db", uuid::Uuid::now_v7());
    let path: PathBuf = env::temp_dir().join(file_name);
    path.display().to_string()
}

async fn open_storage(db_path: &str) -> RunnerResult<Arc<SqliteStorage>> {
    let storage = SqliteStorage::open(db_path)
        .await
        .context(StorageValidationSnafu {
            stage: "runner-open-storage",
        })?;
    println!("db_path={db_path}");
    Ok(Arc::new(storage))
}

async fn run_settings_roundtrip(db_path: &str) -> RunnerResult<()> {
    let storage = open_storage(db_path).await?;

    let writer = SettingsState::new(storage.clone());
    writer
        .save(SettingsPatch {
            api_key: Some("sk-qa".to_string()),
            base_url: Some("https://qa.example/v1".to_string()),
            theme: Some(Theme::Light),
        })
        .await
        .context(StorageValidationSnafu {
            stage: "settings-roundtrip-save",
        })?;

    let reader = SettingsState::new(storage);
    reader.load().await.context(StorageValidationSnafu {
        stage: "settings-roundtrip-load",
    })?;

    let loaded = reader.current();
    ensure_scenario(
        loaded.api_key == "sk-qa"
            && loaded.resolved_base_url() == "https://qa.example/v1"
            && loaded.theme == Theme::Light,
        "settings_roundtrip",
        "reloaded settings do not match the saved singleton",
    )?;

    println!("settings_roundtrip_ok=true");
    Ok(())
}

async fn run_chat_lifecycle(db_path: &str) -> RunnerResult<()> {
    let storage = open_storage(db_path).await?;
    let settings = Arc::new(SettingsState::new(storage.clone()));
    let api = Arc::new(OpenRouterClient::new());
    let mut workspace = ChatWorkspace::new(storage, api, settings);

    let first = workspace
        .create_chat("first", "m1")
        .await
        .context(StorageValidationSnafu {
            stage: "chat-lifecycle-create-first",
        })?;
    let second = workspace
        .create_chat("second", "m1")
        .await
        .context(StorageValidationSnafu {
            stage: "chat-lifecycle-create-second",
        })?;

    workspace
        .update_chat_title(second.id, "renamed")
        .await
        .context(StorageValidationSnafu {
            stage: "chat-lifecycle-rename",
        })?;

    workspace
        .select_chat(first.id)
        .await
        .context(StorageValidationSnafu {
            stage: "chat-lifecycle-select",
        })?;
    std::thread::sleep(Duration::from_millis(5));
    workspace
        .add_message(MessageRole::User, "hello", Vec::new(), None)
        .await
        .context(StorageValidationSnafu {
            stage: "chat-lifecycle-append",
        })?;

    ensure_scenario(
        workspace.chats().first().map(|chat| chat.id) == Some(first.id),
        "chat_lifecycle",
        "appending a message did not move the chat to the front",
    )?;

    workspace
        .delete_chat(first.id)
        .await
        .context(StorageValidationSnafu {
            stage: "chat-lifecycle-delete",
        })?;
    ensure_scenario(
        workspace.active_chat_id().is_none() && workspace.messages().is_empty(),
        "chat_lifecycle",
        "deleting the active chat did not clear the selection",
    )?;
    ensure_scenario(
        workspace.chats().len() == 1 && workspace.chats()[0].title == "renamed",
        "chat_lifecycle",
        "surviving chat list is wrong after delete",
    )?;

    println!("chat_lifecycle_ok=true");
    Ok(())
}

async fn run_send_skip_without_key(db_path: &str) -> RunnerResult<()> {
    let storage = open_storage(db_path).await?;
    let settings = Arc::new(SettingsState::new(storage.clone()));
    let api = Arc::new(OpenRouterClient::new());
    let mut workspace = ChatWorkspace::new(storage, api, settings);

    workspace
        .create_chat("Demo", "m1")
        .await
        .context(StorageValidationSnafu {
            stage: "send-skip-create",
        })?;
    let outcome = workspace
        .send_message("hello", Vec::new())
        .await
        .context(StorageValidationSnafu {
            stage: "send-skip-send",
        })?;

    ensure_scenario(
        outcome == SendOutcome::Skipped(SkipReason::MissingApiKey),
        "send_skip_without_key",
        "send without a credential was not skipped",
    )?;
    ensure_scenario(
        workspace.messages().is_empty() && workspace.chats().len() == 1,
        "send_skip_without_key",
        "skipped send must leave the transcript untouched",
    )?;

    println!("send_skip_without_key_ok=true");
    Ok(())
}

async fn run_catalog_cache_adopt(db_path: &str) -> RunnerResult<()> {
    let storage = open_storage(db_path).await?;
    storage
        .replace_cached_models(&[
            CachedModelRecord {
                id: "openai/gpt-4o".to_string(),
                name: "GPT-4o".to_string(),
                description: None,
                context_length: Some(128_000),
                pricing_prompt: None,
                pricing_completion: None,
            },
            CachedModelRecord {
                id: "anthropic/claude-3.5-sonnet".to_string(),
                name: "Claude 3.5 Sonnet".to_string(),
                description: None,
                context_length: Some(200_000),
                pricing_prompt: None,
                pricing_completion: None,
            },
        ])
        .await
        .context(StorageValidationSnafu {
            stage: "catalog-adopt-seed",
        })?;

    let settings = Arc::new(SettingsState::new(storage.clone()));
    let api = Arc::new(OpenRouterClient::new());
    let mut catalog = ModelCatalog::new(storage, api, settings);

    // A warm cache must be adopted without touching the network.
    catalog.load_models(false).await;
    ensure_scenario(
        catalog.models().len() == 2 && catalog.error().is_none(),
        "catalog_cache_adopt",
        "cached catalog was not adopted",
    )?;
    ensure_scenario(
        catalog.filter_models("claude").len() == 1,
        "catalog_cache_adopt",
        "filter over the adopted catalog is wrong",
    )?;

    println!("catalog_cache_adopt_ok=true");
    Ok(())
}

fn ensure_scenario(
    condition: bool,
    scenario: &'static str,
    reason: &str,
) -> RunnerResult<()> {
    if condition {
        return Ok(());
    }

    ScenarioFailedSnafu {
        stage: "ensure-scenario",
        scenario,
        reason: reason.to_string(),
    }
    .fail()
}
