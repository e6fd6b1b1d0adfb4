//! Roster and server-version scenarios, runnable against any manager.

use anyhow::{ensure, Context, Result};
use futures::future::try_join_all;
use messaging_test::assertions::{
    assert_bad_request, assert_items, assert_no_error, assert_roster_push, roster_from_response,
};
use messaging_test::jid::BareJid;
use messaging_test::minidom::Element;
use messaging_test::roster::{RosterItem, RosterQuery, Subscription, ROSTER_NS};
use messaging_test::version::SoftwareVersion;
use messaging_test::{random_id, ClientManager, IqAttrs, PushHandler, TestClient};

use super::{PUSH_TIMEOUT, SERVER_NAME};

/// A contact address on the configured domain that no test account uses.
fn contact(manager: &ClientManager) -> Result<BareJid> {
    let value = format!("{}@{}", random_id(), manager.config().domain);
    value.parse().with_context(|| format!("invalid contact {value}"))
}

async fn single_client(manager: &mut ClientManager) -> Result<(TestClient, BareJid)> {
    let (client, identity) = manager.register(PushHandler::iq())?;
    manager.connect_all().await?;
    Ok((client, identity.jid))
}

async fn add(client: &TestClient, item: RosterItem) -> Result<()> {
    let response = client
        .send_iq(IqAttrs::set(), RosterQuery::set(vec![item]))
        .await?;
    assert_no_error(&response)?;
    Ok(())
}

async fn roster(client: &TestClient) -> Result<RosterQuery> {
    let response = client.send_iq(IqAttrs::get(), RosterQuery::get()).await?;
    Ok(roster_from_response(&response)?)
}

fn by_jid(mut items: Vec<RosterItem>) -> Vec<RosterItem> {
    items.sort_by_key(|item| item.jid.to_string());
    items
}

pub async fn set_empty(manager: &mut ClientManager) -> Result<()> {
    let (romeo, _) = single_client(manager).await?;

    let response = romeo
        .send_iq(IqAttrs::set(), RosterQuery::set(Vec::new()))
        .await?;
    assert_bad_request(&response)?;
    Ok(())
}

pub async fn set_one(manager: &mut ClientManager) -> Result<()> {
    let (romeo, _) = single_client(manager).await?;
    let item = RosterItem::with_name(contact(manager)?, "test-name")
        .add_group("test-group1")
        .add_group("test");

    let response = romeo
        .send_iq(IqAttrs::set(), RosterQuery::set(vec![item.clone()]))
        .await?;
    assert_no_error(&response)?;
    ensure!(response.payload.is_none(), "roster set result carries a payload");

    let push = romeo.receive_push_within(PUSH_TIMEOUT).await?;
    assert_roster_push(&push, &[item])?;
    Ok(())
}

pub async fn set_ignores_subscription(manager: &mut ClientManager) -> Result<()> {
    let (romeo, _) = single_client(manager).await?;
    let item = RosterItem::with_name(contact(manager)?, "test-name").add_group("test");

    let mut raw = item.to_element();
    raw.set_attr("subscription", "subscriptionToIgnore");
    let query = Element::builder("query", ROSTER_NS).append(raw).build();

    let response = romeo.send_iq(IqAttrs::set(), query).await?;
    assert_no_error(&response)?;

    let push = romeo.receive_push_within(PUSH_TIMEOUT).await?;
    assert_roster_push(&push, &[item])?;
    Ok(())
}

/// Only the first item of a multi-item set is applied.
pub async fn set_multiple(manager: &mut ClientManager) -> Result<()> {
    let (romeo, _) = single_client(manager).await?;
    let first = RosterItem::new(contact(manager)?);
    let second = RosterItem::with_name(contact(manager)?, "ignored");

    let response = romeo
        .send_iq(IqAttrs::set(), RosterQuery::set(vec![first.clone(), second]))
        .await?;
    assert_no_error(&response)?;

    let push = romeo.receive_push_within(PUSH_TIMEOUT).await?;
    assert_roster_push(&push, &[first])?;
    Ok(())
}

pub async fn set_self(manager: &mut ClientManager) -> Result<()> {
    let (romeo, own) = single_client(manager).await?;

    let response = romeo
        .send_iq(
            IqAttrs::set(),
            RosterQuery::set(vec![RosterItem::with_name(own, "me")]),
        )
        .await?;
    assert_bad_request(&response)?;
    Ok(())
}

/// Two sets on the same contact produce two pushes, in order.
pub async fn set_update(manager: &mut ClientManager) -> Result<()> {
    let (romeo, _) = single_client(manager).await?;
    let target = contact(manager)?;
    let before = RosterItem::with_name(target.clone(), "Before");
    let after = RosterItem::with_name(target, "After");

    add(&romeo, before.clone()).await?;
    add(&romeo, after.clone()).await?;

    assert_roster_push(&romeo.receive_push_within(PUSH_TIMEOUT).await?, &[before])?;
    assert_roster_push(&romeo.receive_push_within(PUSH_TIMEOUT).await?, &[after.clone()])?;
    assert_items(&[after], &roster(&romeo).await?.items)?;
    Ok(())
}

/// Concurrent sets on one stream are all answered and all pushed.
pub async fn set_many_concurrently(manager: &mut ClientManager, count: usize) -> Result<()> {
    let (romeo, _) = single_client(manager).await?;
    let items = (0..count)
        .map(|n| Ok(RosterItem::with_name(contact(manager)?, format!("contact-{n}"))))
        .collect::<Result<Vec<_>>>()?;

    try_join_all(items.iter().cloned().map(|item| add(&romeo, item))).await?;

    let mut pushed = Vec::with_capacity(count);
    for _ in 0..count {
        let push = romeo.receive_push_within(PUSH_TIMEOUT).await?;
        let payload = push
            .request_payload()
            .context("push without a payload")?;
        pushed.extend(RosterQuery::from_element(payload)?.items);
    }
    assert_items(&by_jid(items.clone()), &by_jid(pushed))?;
    assert_items(&by_jid(items), &by_jid(roster(&romeo).await?.items))?;
    Ok(())
}

/// Adding another test account only changes the adder's roster.
pub async fn add_other_account(manager: &mut ClientManager) -> Result<()> {
    let (romeo, _) = manager.register(PushHandler::iq())?;
    let (juliet, juliet_id) = manager.register(PushHandler::iq())?;
    manager.connect_all().await?;

    let item = RosterItem::with_name(juliet_id.jid, "Juliet");
    add(&romeo, item.clone()).await?;

    assert_roster_push(&romeo.receive_push_within(PUSH_TIMEOUT).await?, &[item.clone()])?;
    assert_items(&[item], &roster(&romeo).await?.items)?;
    assert_items(&[], &roster(&juliet).await?.items)?;
    ensure!(
        juliet.try_receive_push().is_none(),
        "juliet received a push for romeo's roster"
    );
    Ok(())
}

pub async fn get_empty(manager: &mut ClientManager) -> Result<()> {
    let (romeo, _) = single_client(manager).await?;
    assert_items(&[], &roster(&romeo).await?.items)?;
    Ok(())
}

pub async fn get_one_user(manager: &mut ClientManager) -> Result<()> {
    let (romeo, _) = manager.register(PushHandler::iq())?;
    let (_, juliet) = manager.register(PushHandler::iq())?;
    manager.connect_all().await?;

    let item = RosterItem::with_name(juliet.jid, "test");
    add(&romeo, item.clone()).await?;

    assert_items(&[item], &roster(&romeo).await?.items)?;
    Ok(())
}

pub async fn get_multiple_users(manager: &mut ClientManager) -> Result<()> {
    let (romeo, _) = single_client(manager).await?;
    let count = rand::random_range(1..=5);

    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        let item = RosterItem::with_name(contact(manager)?, "test");
        add(&romeo, item.clone()).await?;
        items.push(item);
    }

    assert_items(&by_jid(items), &by_jid(roster(&romeo).await?.items))?;
    Ok(())
}

pub async fn get_one_group(manager: &mut ClientManager) -> Result<()> {
    let (romeo, _) = single_client(manager).await?;
    add(
        &romeo,
        RosterItem::with_name(contact(manager)?, "test").add_group("test-group"),
    )
    .await?;

    let items = roster(&romeo).await?.items;
    ensure!(items.len() == 1, "expected one item, got {items:?}");
    ensure!(
        items[0].groups == ["test-group"],
        "unexpected groups {:?}",
        items[0].groups
    );
    Ok(())
}

pub async fn get_multiple_groups(manager: &mut ClientManager) -> Result<()> {
    let (romeo, _) = single_client(manager).await?;
    let mut groups: Vec<String> = (0..rand::random_range(1..=10))
        .map(|_| random_id())
        .collect();

    let item = groups.iter().fold(
        RosterItem::with_name(contact(manager)?, "test"),
        |item, group| item.add_group(group.clone()),
    );
    add(&romeo, item).await?;

    let items = roster(&romeo).await?.items;
    ensure!(items.len() == 1, "expected one item, got {items:?}");
    let mut actual = items[0].groups.clone();
    groups.sort();
    actual.sort();
    ensure!(actual == groups, "groups differ: {actual:?} vs {groups:?}");
    Ok(())
}

pub async fn delete_one(manager: &mut ClientManager) -> Result<()> {
    let (romeo, _) = single_client(manager).await?;
    let target = contact(manager)?;

    // Name and groups on a removal are dropped from the push.
    let removal = RosterItem::with_name(target.clone(), "test-name")
        .add_group("test-group1")
        .set_subscription(Subscription::Remove);

    let response = romeo
        .send_iq(IqAttrs::set(), RosterQuery::set(vec![removal]))
        .await?;
    assert_no_error(&response)?;

    let push = romeo.receive_push_within(PUSH_TIMEOUT).await?;
    assert_roster_push(
        &push,
        &[RosterItem::new(target).set_subscription(Subscription::Remove)],
    )?;
    Ok(())
}

/// Removing a contact that was added empties the roster again.
pub async fn delete_existing(manager: &mut ClientManager) -> Result<()> {
    let (romeo, _) = single_client(manager).await?;
    let target = contact(manager)?;
    add(&romeo, RosterItem::with_name(target.clone(), "gone soon")).await?;

    let response = romeo
        .send_iq(IqAttrs::set(), RosterQuery::remove(target.clone()))
        .await?;
    assert_no_error(&response)?;

    romeo.receive_push_within(PUSH_TIMEOUT).await?;
    let removal = romeo.receive_push_within(PUSH_TIMEOUT).await?;
    assert_roster_push(&removal, &[RosterItem::removal(target)])?;
    assert_items(&[], &roster(&romeo).await?.items)?;
    Ok(())
}

pub async fn delete_self(manager: &mut ClientManager) -> Result<()> {
    let (romeo, own) = single_client(manager).await?;

    let response = romeo
        .send_iq(IqAttrs::set(), RosterQuery::remove(own))
        .await?;
    assert_bad_request(&response)?;
    Ok(())
}

pub async fn versioning_advertised(manager: &mut ClientManager) -> Result<()> {
    let (romeo, _) = single_client(manager).await?;
    let features = romeo.features().context("connected client has features")?;
    ensure!(
        features.supports_roster_versioning(),
        "roster versioning not advertised"
    );
    Ok(())
}

/// Two sets on a fresh account leave the roster at version "2".
async fn two_contacts(manager: &mut ClientManager) -> Result<TestClient> {
    let (romeo, _) = single_client(manager).await?;
    for _ in 0..2 {
        let item = RosterItem::with_name(contact(manager)?, "test-name")
            .add_group("test-group1")
            .add_group("test");
        add(&romeo, item).await?;
    }
    Ok(romeo)
}

pub async fn versioning_bootstrap(manager: &mut ClientManager) -> Result<()> {
    let romeo = two_contacts(manager).await?;

    let response = romeo
        .send_iq(IqAttrs::get(), RosterQuery::get_versioned(""))
        .await?;
    let roster = roster_from_response(&response)?;
    ensure!(roster.items.len() == 2, "expected 2 items, got {:?}", roster.items);
    ensure!(roster.ver.is_some(), "full roster without a version");
    Ok(())
}

pub async fn versioning_same_version(manager: &mut ClientManager) -> Result<()> {
    let romeo = two_contacts(manager).await?;

    let response = romeo
        .send_iq(IqAttrs::get(), RosterQuery::get_versioned("2"))
        .await?;
    assert_no_error(&response)?;
    ensure!(
        response.payload.is_none(),
        "up-to-date roster was sent again: {:?}",
        response.payload
    );
    Ok(())
}

pub async fn versioning_different_version(manager: &mut ClientManager) -> Result<()> {
    let romeo = two_contacts(manager).await?;

    let response = romeo
        .send_iq(
            IqAttrs::get(),
            RosterQuery::get_versioned("notTheSameRosterVersion"),
        )
        .await?;
    let roster = roster_from_response(&response)?;
    ensure!(roster.items.len() == 2, "expected 2 items, got {:?}", roster.items);
    Ok(())
}

pub async fn server_version(manager: &mut ClientManager) -> Result<()> {
    let (romeo, _) = single_client(manager).await?;

    let response = romeo.send_iq(IqAttrs::get(), SoftwareVersion::query()).await?;
    assert_no_error(&response)?;
    let version: SoftwareVersion = response
        .payload_as()
        .context("version response without a valid payload")?;
    ensure!(
        version.name == SERVER_NAME,
        "unexpected server name {:?}",
        version.name
    );
    Ok(())
}
