use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use live_poll::{
    ballot::BallotOption,
    hub::{self, ClientHandle, ClientId, HubHandle},
    message::{Envelope, MessageKind},
    tally::TallyStore,
};
use tokio::{sync::mpsc::UnboundedReceiver, time::timeout};

const RECV_TIMEOUT: Duration = Duration::from_secs(1);

struct TestClient {
    id: ClientId,
    outbound: UnboundedReceiver<String>,
}

impl TestClient {
    async fn join(hub: &HubHandle) -> Result<Self> {
        let (handle, outbound) = ClientHandle::new();
        let id = handle.id().clone();
        hub.register(handle)?;

        let mut client = Self { id, outbound };
        let welcome = client.recv().await?;
        assert_eq!(welcome.message_kind(), Some(MessageKind::ConnectSuccess));
        assert_eq!(welcome.str_field("client_id"), Some(client.id.as_str()));
        Ok(client)
    }

    fn send(&self, hub: &HubHandle, message: Envelope) -> Result<()> {
        hub.dispatch(self.id.clone(), message)
    }

    async fn recv(&mut self) -> Result<Envelope> {
        let encoded = timeout(RECV_TIMEOUT, self.outbound.recv())
            .await
            .context("timed out waiting for hub message")?
            .context("outbound queue closed")?;
        Envelope::decode(&encoded).context("hub sent undecodable message")
    }

    async fn expect_status(&mut self, hub: &HubHandle, vote_key: &str) -> Result<String> {
        self.send(hub, Envelope::query_vote_status(vote_key))?;
        let reply = self.recv().await?;
        assert_eq!(reply.message_kind(), Some(MessageKind::VoteStatus));
        Ok(reply
            .str_field("status")
            .context("status missing")?
            .to_string())
    }
}

fn start() -> (Arc<TallyStore>, HubHandle) {
    let tally = Arc::new(TallyStore::new());
    let hub = hub::spawn(Arc::clone(&tally));
    (tally, hub)
}

#[tokio::test]
async fn registration_assigns_distinct_ids() -> Result<()> {
    let (_tally, hub) = start();
    let alice = TestClient::join(&hub).await?;
    let bob = TestClient::join(&hub).await?;

    assert!(!alice.id.as_str().is_empty());
    assert_ne!(alice.id, bob.id);
    assert_eq!(hub.connection_count().await?, 2);
    Ok(())
}

#[tokio::test]
async fn open_and_close_are_broadcast_to_everyone() -> Result<()> {
    let (tally, hub) = start();
    let mut alice = TestClient::join(&hub).await?;
    let mut bob = TestClient::join(&hub).await?;

    tally.open();
    tally.close();

    for client in [&mut alice, &mut bob] {
        let opened = client.recv().await?;
        assert_eq!(opened, Envelope::vote_status_change(true));
        let closed = client.recv().await?;
        assert_eq!(closed, Envelope::vote_status_change(false));
    }
    Ok(())
}

#[tokio::test]
async fn vote_is_acknowledged_only_to_its_sender() -> Result<()> {
    let (tally, hub) = start();
    let mut alice = TestClient::join(&hub).await?;
    let mut bob = TestClient::join(&hub).await?;
    tally.open();
    alice.recv().await?;
    bob.recv().await?;

    alice.send(&hub, Envelope::vote("2", "abc"))?;
    assert_eq!(alice.recv().await?, Envelope::vote_success());
    assert_eq!(tally.snapshot().count(BallotOption::PlusTwo), 1);

    // Bob's next message is the reply to his own query, not Alice's ack.
    assert_eq!(bob.expect_status(&hub, "abc").await?, "already_voted");
    Ok(())
}

#[tokio::test]
async fn duplicate_vote_is_acknowledged_but_counted_once() -> Result<()> {
    let (tally, hub) = start();
    tally.open();
    let mut alice = TestClient::join(&hub).await?;

    alice.send(&hub, Envelope::vote("1", "abc"))?;
    assert_eq!(alice.recv().await?, Envelope::vote_success());
    alice.send(&hub, Envelope::vote("-1", "abc"))?;
    assert_eq!(alice.recv().await?, Envelope::vote_success());

    let tally = tally.snapshot();
    assert_eq!(tally.total(), 1);
    assert_eq!(tally.count(BallotOption::PlusOne), 1);
    Ok(())
}

#[tokio::test]
async fn vote_while_closed_reports_votes_closed() -> Result<()> {
    let (tally, hub) = start();
    let mut alice = TestClient::join(&hub).await?;

    alice.send(&hub, Envelope::vote("0", "abc"))?;
    let reply = alice.recv().await?;
    assert_eq!(reply.message_kind(), Some(MessageKind::VoteStatus));
    assert_eq!(reply.str_field("status"), Some("votes_closed"));
    assert_eq!(tally.snapshot().total(), 0);
    Ok(())
}

#[tokio::test]
async fn bad_input_gets_no_reply_and_keeps_connection() -> Result<()> {
    let (tally, hub) = start();
    tally.open();
    let mut alice = TestClient::join(&hub).await?;

    alice.send(&hub, Envelope::vote("9", "abc"))?;
    alice.send(&hub, Envelope::new(MessageKind::Vote).with("vote", "1"))?;
    alice.send(&hub, Envelope::new(MessageKind::Vote).with("vote_key", "abc"))?;
    alice.send(&hub, Envelope::new(MessageKind::Vote).with("vote", 1).with("vote_key", "abc"))?;
    alice.send(&hub, Envelope::new(MessageKind::QueryVoteStatus))?;
    alice.send(
        &hub,
        Envelope {
            kind: "dance".to_string(),
            payload: Default::default(),
        },
    )?;

    // Events are handled in order, so the first reply must answer this query.
    assert_eq!(alice.expect_status(&hub, "abc").await?, "can_vote");
    assert_eq!(tally.snapshot().total(), 0);
    assert_eq!(hub.connection_count().await?, 1);
    Ok(())
}

#[tokio::test]
async fn query_reflects_session_state() -> Result<()> {
    let (tally, hub) = start();
    let mut alice = TestClient::join(&hub).await?;
    assert_eq!(alice.expect_status(&hub, "abc").await?, "votes_closed");

    tally.open();
    alice.recv().await?;
    assert_eq!(alice.expect_status(&hub, "abc").await?, "can_vote");

    alice.send(&hub, Envelope::vote("-3", "abc"))?;
    alice.recv().await?;
    assert_eq!(alice.expect_status(&hub, "abc").await?, "already_voted");
    Ok(())
}

#[tokio::test]
async fn deregistration_closes_queue_and_is_idempotent() -> Result<()> {
    let (tally, hub) = start();
    let mut alice = TestClient::join(&hub).await?;
    let mut bob = TestClient::join(&hub).await?;

    hub.deregister(alice.id.clone())?;
    hub.deregister(alice.id.clone())?;
    assert_eq!(hub.connection_count().await?, 1);

    let closed = timeout(RECV_TIMEOUT, alice.outbound.recv()).await?;
    assert!(closed.is_none(), "queue should close after deregistration");

    tally.open();
    assert_eq!(bob.recv().await?, Envelope::vote_status_change(true));
    Ok(())
}

#[tokio::test]
async fn replies_to_departed_clients_are_dropped() -> Result<()> {
    let (tally, hub) = start();
    tally.open();
    let alice = TestClient::join(&hub).await?;
    let departed = alice.id.clone();

    hub.deregister(departed.clone())?;
    hub.dispatch(departed, Envelope::vote("3", "late"))?;

    // The vote itself still counts; only the reply has nowhere to go.
    assert_eq!(hub.connection_count().await?, 0);
    assert_eq!(tally.snapshot().count(BallotOption::PlusThree), 1);
    Ok(())
}
