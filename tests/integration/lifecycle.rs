use crate::integration::support::{agent, start, stop, wait_until, LetterEmbedder, ScriptedChat};
use llmux::broker::Backend;
use llmux::chat::Chat;
use llmux::device::{Device, VectorMemory};
use llmux::directive::{execute, CommandRunner, Directive, DirectiveKind};
use llmux::handler::TaskContext;
use llmux::severity::Severity;
use llmux::system::{System, SystemOptions};
use std::sync::Arc;
use tempfile::TempDir;

fn memory(storage: &TempDir) -> Arc<VectorMemory<LetterEmbedder>> {
    let embedder = Arc::new(Backend::new("letters", "letter frequencies", LetterEmbedder));
    Arc::new(VectorMemory::new("memory", embedder).with_storage_dir(storage.path()))
}

#[tokio::test]
async fn memory_survives_exit_and_restart() {
    let storage = TempDir::new().unwrap();

    let first = System::default();
    let notes = memory(&storage);
    first.add_device(notes.clone());
    notes.add("tester", "the deploy key lives in the vault").await;
    notes.add("tester", "lunch is at noon").await;
    assert_eq!(first.exit(), "Released all resources, ready to exit.");
    assert!(storage.path().join("memory.json").is_file());

    let second = System::default();
    let restored = memory(&storage);
    second.add_device(restored.clone());
    assert!(restored.is_empty());
    let running = start(&second);
    wait_until(|| restored.len() == 2).await;
    stop(&second, running).await;

    let hit = restored
        .invoke("tester", "query", &["The deploy key lives in the vault?".to_string()])
        .await
        .unwrap();
    assert!(hit.contains("the deploy key lives in the vault"));
}

#[tokio::test]
async fn new_devices_are_announced_to_peers() {
    let storage = TempDir::new().unwrap();
    let system = System::default();
    let watcher = agent("watcher", Vec::new());
    system.add_peer(Arc::clone(&watcher));

    system.add_device(memory(&storage));

    let announcement = watcher
        .mailbox()
        .into_iter()
        .map(|entry| entry.message.content)
        .find(|content| content.starts_with("A new device is available."))
        .unwrap();
    assert!(announcement.contains("memory.add(text)"));
    assert_eq!(system.device_names(), vec!["memory"]);
}

#[tokio::test]
async fn agents_can_spawn_other_agents() {
    let output = TempDir::new().unwrap();
    let system = System::new(SystemOptions {
        output_dir: Some(output.path().to_path_buf()),
        ..SystemOptions::default()
    });
    system.add_chat_backend(ScriptedChat::backend("scripted", &["to room: hi, I am helper"]));
    let room = Chat::new("room");
    system.add_chat(Arc::clone(&room));
    let boss = agent("boss", Vec::new());
    system.add_peer(Arc::clone(&boss));
    boss.join_chat(&room, false);

    let ctx = TaskContext {
        peer: Arc::clone(&boss),
        system: system.clone(),
    };
    let spawn = Directive::new(
        DirectiveKind::Eval,
        r#"system.add_bot("helper", "scripted", "introduce yourself", "room")"#,
    );
    let outcome = execute(&CommandRunner, &ctx, &spawn).await;
    assert_eq!(outcome.severity, Severity::Info);
    assert_eq!(outcome.content, "Call finished. The results are Added peer named helper");
    assert_eq!(room.member_names(), vec!["boss", "helper"]);
    assert!(output.path().join("bot_helper.txt").is_file());

    let again = execute(&CommandRunner, &ctx, &spawn).await;
    assert!(again.content.ends_with("Peer name has been used. Try another name."));

    let running = start(&system);
    wait_until(|| {
        boss.mailbox()
            .iter()
            .any(|entry| entry.message.content == "hi, I am helper")
    })
    .await;
    stop(&system, running).await;

    let removal = Directive::new(DirectiveKind::Eval, "system.remove_peer(\"boss\")");
    let refused = execute(&CommandRunner, &ctx, &removal).await;
    assert_eq!(refused.severity, Severity::Error);
    let removal = Directive::new(DirectiveKind::Eval, "system.remove_peer(\"helper\")");
    execute(&CommandRunner, &ctx, &removal).await;
    assert_eq!(room.member_names(), vec!["boss"]);
}
