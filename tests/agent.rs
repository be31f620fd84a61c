// Copyright (C) 2020 Matthew Waters <matthew@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_std::net::UdpSocket;
use async_std::task;

use futures::{Stream, StreamExt};

use librice_conncheck::agent::{Agent, AgentMessage};
use librice_conncheck::component::ComponentState;
use librice_conncheck::conncheck::Credentials;
use librice_conncheck::retry::RetryPolicy;
use librice_conncheck::session::Session;

#[macro_use]
extern crate tracing;

mod common;

fn credentials() -> (Credentials, Credentials) {
    (
        Credentials::new("luser", "lpass"),
        Credentials::new("ruser", "rpass"),
    )
}

// everything the agent reports until the checks finish
async fn collect_messages(messages: impl Stream<Item = AgentMessage>) -> Vec<AgentMessage> {
    futures::pin_mut!(messages);
    let mut ret = vec![];
    while let Some(msg) = messages.next().await {
        debug!("agent message {:?}", msg);
        let done = matches!(msg, AgentMessage::ChecksSucceeded | AgentMessage::ChecksFailed);
        ret.push(msg);
        if done {
            break;
        }
    }
    ret
}

fn selected(messages: &[AgentMessage]) -> Vec<(SocketAddr, SocketAddr)> {
    messages
        .iter()
        .filter_map(|msg| match msg {
            AgentMessage::SelectedPair { local, remote, .. } => {
                Some((local.address, remote.address))
            }
            _ => None,
        })
        .collect()
}

#[test]
fn udp_connection() {
    common::debug_init();
    task::block_on(async move {
        let lsocket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let rsocket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let laddr = lsocket.local_addr().unwrap();
        let raddr = rsocket.local_addr().unwrap();
        let (lcreds, rcreds) = credentials();

        let builder = || Session::builder().pacing_interval(Duration::from_millis(10));
        let lagent = Arc::new(Agent::new(
            common::session(
                builder().controlling(true),
                (lcreds.clone(), laddr),
                (rcreds.clone(), raddr),
            ),
            Arc::new(common::UdpTransport {
                socket: lsocket.clone(),
            }),
        ));
        let ragent = Arc::new(Agent::new(
            common::session(builder(), (rcreds, raddr), (lcreds, laddr)),
            Arc::new(common::UdpTransport {
                socket: rsocket.clone(),
            }),
        ));

        task::spawn(common::udp_receive_loop(lagent.clone(), lsocket));
        task::spawn(common::udp_receive_loop(ragent.clone(), rsocket));
        let lmessages = task::spawn(collect_messages(lagent.message_channel()));
        let rmessages = task::spawn(collect_messages(ragent.message_channel()));
        let lrun = task::spawn({
            let agent = lagent.clone();
            async move { agent.run_loop().await }
        });
        let rrun = task::spawn({
            let agent = ragent.clone();
            async move { agent.run_loop().await }
        });

        lagent.start_checks().await.unwrap();
        ragent.start_checks().await.unwrap();

        let lmessages = async_std::future::timeout(Duration::from_secs(10), lmessages)
            .await
            .unwrap();
        let rmessages = async_std::future::timeout(Duration::from_secs(10), rmessages)
            .await
            .unwrap();
        assert_eq!(lmessages.last(), Some(&AgentMessage::ChecksSucceeded));
        assert_eq!(rmessages.last(), Some(&AgentMessage::ChecksSucceeded));
        assert_eq!(selected(&lmessages), vec![(laddr, raddr)]);
        assert_eq!(selected(&rmessages), vec![(raddr, laddr)]);
        assert!(lmessages.contains(&AgentMessage::ComponentStateChange {
            stream: 0,
            component: 1,
            state: ComponentState::Connected
        }));

        lrun.await.unwrap();
        rrun.await.unwrap();
        assert!(lagent.controlling().await);
        assert!(!ragent.controlling().await);
    });
}

#[test]
fn role_conflict_over_router() {
    common::debug_init();
    task::block_on(async move {
        let router = Arc::new(common::Router::default());
        let laddr: SocketAddr = "192.168.1.1:1000".parse().unwrap();
        let raddr: SocketAddr = "192.168.1.2:2000".parse().unwrap();
        let lrecv = router.add_route(laddr);
        let rrecv = router.add_route(raddr);
        let (lcreds, rcreds) = credentials();

        let builder = || {
            Session::builder()
                .controlling(true)
                .pacing_interval(Duration::from_millis(10))
        };
        let lagent = Arc::new(Agent::new(
            common::session(
                builder().tie_breaker(u64::MAX),
                (lcreds.clone(), laddr),
                (rcreds.clone(), raddr),
            ),
            Arc::new(common::RouterTransport {
                router: router.clone(),
            }),
        ));
        let ragent = Arc::new(Agent::new(
            common::session(builder().tie_breaker(0), (rcreds, raddr), (lcreds, laddr)),
            Arc::new(common::RouterTransport { router }),
        ));

        task::spawn(common::router_receive_loop(lagent.clone(), lrecv));
        task::spawn(common::router_receive_loop(ragent.clone(), rrecv));
        let lmessages = task::spawn(collect_messages(lagent.message_channel()));
        let rmessages = task::spawn(collect_messages(ragent.message_channel()));
        for agent in [&lagent, &ragent] {
            let agent = agent.clone();
            task::spawn(async move { agent.run_loop().await });
        }

        lagent.start_checks().await.unwrap();
        ragent.start_checks().await.unwrap();

        let lmessages = async_std::future::timeout(Duration::from_secs(10), lmessages)
            .await
            .unwrap();
        let rmessages = async_std::future::timeout(Duration::from_secs(10), rmessages)
            .await
            .unwrap();
        assert_eq!(lmessages.last(), Some(&AgentMessage::ChecksSucceeded));
        assert_eq!(rmessages.last(), Some(&AgentMessage::ChecksSucceeded));
        assert!(!lmessages
            .iter()
            .any(|msg| matches!(msg, AgentMessage::RoleChange { .. })));
        assert_eq!(
            rmessages
                .iter()
                .filter(|msg| **msg == AgentMessage::RoleChange { controlling: false })
                .count(),
            1
        );
        assert!(lagent.controlling().await);
        assert!(!ragent.controlling().await);
    });
}

#[test]
fn unreachable_peer_fails() {
    common::debug_init();
    task::block_on(async move {
        let router = Arc::new(common::Router::default());
        let laddr: SocketAddr = "192.168.1.1:1000".parse().unwrap();
        let raddr: SocketAddr = "192.168.1.2:2000".parse().unwrap();
        let _lrecv = router.add_route(laddr);
        let (lcreds, rcreds) = credentials();
        let policy = RetryPolicy::builder()
            .initial_timeout(Duration::from_millis(10))
            .max_attempts(3)
            .final_timeout_multiplier(4)
            .build();

        let agent = Arc::new(Agent::new(
            common::session(
                Session::builder()
                    .controlling(true)
                    .pacing_interval(Duration::from_millis(5))
                    .retry_policy(policy),
                (lcreds, laddr),
                (rcreds, raddr),
            ),
            Arc::new(common::RouterTransport { router }),
        ));
        let messages = task::spawn(collect_messages(agent.message_channel()));
        let run = task::spawn({
            let agent = agent.clone();
            async move { agent.run_loop().await }
        });
        agent.start_checks().await.unwrap();

        let messages = async_std::future::timeout(Duration::from_secs(10), messages)
            .await
            .unwrap();
        assert_eq!(messages.last(), Some(&AgentMessage::ChecksFailed));
        assert!(messages.contains(&AgentMessage::ComponentStateChange {
            stream: 0,
            component: 1,
            state: ComponentState::Failed
        }));
        assert!(selected(&messages).is_empty());
        run.await.unwrap();
    });
}
