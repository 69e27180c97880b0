use crate::integration::support::{start, stop, wait_until, ScriptedChat, ScriptedConsole};
use llmux::chat::Chat;
use llmux::peer::{agent_config, assign_task, human_config, ConsoleParser, Peer, PeerConfig};
use llmux::severity::Severity;
use llmux::system::System;
use llmux::types::{PeerKind, Role};
use std::sync::Arc;
use std::time::Duration;

fn listener(name: &str) -> Arc<Peer> {
    Peer::new(PeerConfig::new(
        name,
        PeerKind::Human,
        Arc::new(ConsoleParser::default()),
    ))
    .unwrap()
}

fn from<'a>(peer: &'a Peer, sender: &'a str) -> impl Fn() -> Vec<String> + 'a {
    move || {
        peer.mailbox()
            .into_iter()
            .filter(|entry| entry.message.sender.name() == sender)
            .map(|entry| entry.message.content)
            .collect()
    }
}

#[tokio::test]
async fn agent_reply_reaches_each_chat_member_once() {
    let system = System::default();
    let room = Chat::new("room");
    let lobby = Chat::new("lobby");
    system.add_chat(Arc::clone(&room));
    system.add_chat(Arc::clone(&lobby));

    let backend = ScriptedChat::backend("scripted", &["to room, lobby: hello"]);
    let bot = Peer::new(agent_config("bot", backend.clone(), false)).unwrap();
    let user = listener("user");
    system.add_peer(Arc::clone(&user));
    system.add_peer(Arc::clone(&bot));
    assign_task(&bot, "greet everyone");
    for chat in [&room, &lobby] {
        user.join_chat(chat, false);
        bot.join_chat(chat, true);
    }

    let running = start(&system);
    let from_bot = from(&user, "bot");
    wait_until(|| !from_bot().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    stop(&system, running).await;

    assert_eq!(from_bot(), vec!["hello"]);
    let own_copy = bot
        .mailbox()
        .into_iter()
        .find(|entry| entry.role == Role::Assistant)
        .unwrap();
    assert_eq!(own_copy.message.content, "to room, lobby: hello");
    for chat in [&room, &lobby] {
        let said: Vec<_> = chat
            .transcript()
            .into_iter()
            .filter(|entry| entry.sender == "bot")
            .map(|entry| entry.content)
            .collect();
        assert_eq!(said, vec!["hello"]);
    }

    let requests = backend.transport().requests.lock().clone();
    let first = &requests[0];
    assert!(first
        .iter()
        .any(|m| m.role == Role::System && m.content == "Hi bot, your task is greet everyone"));
    assert!(first
        .iter()
        .any(|m| m.content.contains("Say hi and introduce yourself.")));
}

#[tokio::test]
async fn directive_results_are_posted_privately() {
    let system = System::default();
    let backend = ScriptedChat::backend(
        "scripted",
        &["eval: `system.peers()`\nexec:\n```\nself.name()\n# comment\nsystem.chats()\n```"],
    );
    let bot = Peer::new(agent_config("bot", backend, true)).unwrap();
    system.add_peer(Arc::clone(&bot));
    system.add_peer(listener("user"));
    system.add_chat(Chat::new("room"));

    let running = start(&system);
    let from_system = from(&bot, "system");
    wait_until(|| {
        from_system()
            .iter()
            .any(|content| content.starts_with("Script finished."))
    })
    .await;
    stop(&system, running).await;

    let notes = from_system();
    assert!(notes.contains(&"Call finished. The results are \"bot\", \"user\"".to_string()));
    assert!(notes.contains(&"Script finished. The results are:\nbot\n\"room\"".to_string()));
    assert!(bot
        .private_chat()
        .transcript()
        .iter()
        .any(|entry| entry.sender == "bot" && entry.content.starts_with("eval:")));
}

#[tokio::test]
async fn unaddressed_agent_output_bounces_to_private_chat() {
    let system = System::default();
    let room = Chat::new("room");
    system.add_chat(Arc::clone(&room));
    let backend = ScriptedChat::backend("scripted", &["to nowhere: anyone?"]);
    let bot = Peer::new(agent_config("bot", backend, false)).unwrap();
    let user = listener("user");
    system.add_peer(Arc::clone(&bot));
    system.add_peer(Arc::clone(&user));
    user.join_chat(&room, false);
    bot.join_chat(&room, true);

    let running = start(&system);
    let from_system = from(&bot, "system");
    wait_until(|| {
        from_system()
            .iter()
            .any(|content| content.starts_with("You cannot send message to these chats: \"nowhere\"."))
    })
    .await;
    stop(&system, running).await;

    assert!(from(&user, "bot")().is_empty());
    let bounced = bot
        .mailbox()
        .into_iter()
        .find(|entry| entry.message.content.starts_with("You cannot send"))
        .unwrap();
    assert_eq!(bounced.message.severity, Severity::Warning);
    assert_eq!(
        bounced.message.content,
        "You cannot send message to these chats: \"nowhere\". \
         You have joined these chats: \"bot-system\", \"room\"."
    );
}

#[tokio::test]
async fn console_user_talks_and_exits() {
    let system = System::default();
    let room = Chat::new("room");
    system.add_chat(Arc::clone(&room));

    let input = ScriptedConsole::backend(&["hi listener", "", "! system.exit()"]);
    let user = Peer::new(human_config("user", input)).unwrap();
    let other = listener("other");
    system.add_peer(Arc::clone(&user));
    system.add_peer(Arc::clone(&other));
    other.join_chat(&room, false);
    user.join_chat(&room, false);

    let stats = tokio::time::timeout(Duration::from_secs(10), system.run())
        .await
        .unwrap();
    assert!(stats.dispatched >= 3);
    assert!(system.is_shutting_down());

    let heard = other
        .mailbox()
        .into_iter()
        .find(|entry| entry.message.sender.name() == "user")
        .unwrap();
    assert_eq!(heard.role, Role::User);
    assert_eq!(heard.message.content, "hi listener");
    assert_eq!(heard.message.sender, user.sender());
    assert!(from(&user, "system")()
        .contains(&"Call finished. The results are System is shutting down.".to_string()));
    assert!(room
        .transcript()
        .iter()
        .all(|entry| entry.content != "! system.exit()"));

    system.exit();
    assert!(system.peer_names().is_empty());
    assert!(!room.contains("user"));
}
