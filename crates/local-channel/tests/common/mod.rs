//! Shared fixtures for the Local driver integration tests: an in-memory
//! dialplan, a recording PBX runner, and helpers for building channels and
//! bridges the way the switch would.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crosspoint_local_channel::{pair_of, LocalDriver, LocalPair};
use crosspoint_switch_core::{
    AmaFlags, Channel, ChannelParams, ChannelState, ChannelTech, ControlOp, Dialplan, Frame,
    PbxRunner, QueryOption, QueryOptionValue, Result, SwitchCore, SwitchError, T38State,
};
use parking_lot::Mutex;

/// Dialplan backed by a fixed set of `(context, exten)` entries.
pub struct TestDialplan {
    extensions: HashSet<(String, String)>,
}

impl TestDialplan {
    pub fn with(extensions: &[(&str, &str)]) -> Arc<TestDialplan> {
        Arc::new(TestDialplan {
            extensions: extensions
                .iter()
                .map(|(context, exten)| (context.to_string(), exten.to_string()))
                .collect(),
        })
    }
}

#[async_trait]
impl Dialplan for TestDialplan {
    async fn exists(
        &self,
        context: &str,
        exten: &str,
        _priority: u32,
        _caller_number: Option<&str>,
    ) -> bool {
        self.extensions
            .contains(&(context.to_string(), exten.to_string()))
    }
}

/// PBX runner that records the channels handed to it.
#[derive(Default)]
pub struct TestPbx {
    started: Mutex<Vec<Arc<Channel>>>,
}

impl TestPbx {
    pub fn started(&self) -> Vec<Arc<Channel>> {
        self.started.lock().clone()
    }
}

#[async_trait]
impl PbxRunner for TestPbx {
    async fn start(&self, chan: Arc<Channel>) -> Result<()> {
        self.started.lock().push(chan);
        Ok(())
    }
}

pub struct Harness {
    pub core: Arc<SwitchCore>,
    pub driver: Arc<LocalDriver>,
    pub pbx: Arc<TestPbx>,
}

/// Build a switch core with the given dialplan entries and a registered
/// Local driver.
pub fn harness(extensions: &[(&str, &str)]) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let pbx = Arc::new(TestPbx::default());
    let core = SwitchCore::new(TestDialplan::with(extensions), pbx.clone());
    let driver = LocalDriver::new(core.clone());
    driver.register().expect("driver registration");
    Harness { core, driver, pbx }
}

/// Allocate a driverless channel standing in for some other technology's
/// call leg.
pub fn plain_channel(core: &Arc<SwitchCore>, name: &str) -> Arc<Channel> {
    core.alloc_channel(ChannelParams {
        name: name.to_string(),
        state: ChannelState::Up,
        exten: String::new(),
        context: String::new(),
        linkedid: String::new(),
        accountcode: String::new(),
        amaflags: AmaFlags::Unset,
    })
    .expect("channel allocation")
}

/// Wire two channels up as bridge partners, as the bridging core would.
pub async fn bridge(a: &Arc<Channel>, b: &Arc<Channel>) {
    a.lock().await.bridge = Some(b.clone());
    b.lock().await.bridge = Some(a.clone());
}

/// The pair behind a Local endpoint.
pub fn pair(chan: &Arc<Channel>) -> Arc<LocalPair> {
    pair_of(chan).expect("channel should carry a local pair")
}

/// The `;2` endpoint behind a `;1` endpoint.
pub async fn outbound_of(owner: &Arc<Channel>) -> Arc<Channel> {
    let pair = pair(owner);
    let state = pair.lock_state().await;
    state.outbound.clone().expect("outbound endpoint present")
}

/// Snapshot a channel's read queue.
pub async fn read_queue(chan: &Arc<Channel>) -> Vec<Frame> {
    chan.lock().await.read_queue.iter().cloned().collect()
}

/// A stub driver for far peers that answer T.38 option queries.
pub struct FaxTech {
    pub state: T38State,
}

#[async_trait]
impl ChannelTech for FaxTech {
    fn type_name(&self) -> &'static str {
        "Fax"
    }

    fn description(&self) -> &'static str {
        "T.38-capable stub driver"
    }

    async fn requester(
        &self,
        _dest: &str,
        _format: crosspoint_switch_core::FormatCap,
        _requestor: Option<&Arc<Channel>>,
    ) -> Result<Arc<Channel>> {
        Err(SwitchError::NotSupported)
    }

    async fn call(&self, _chan: &Arc<Channel>, _dest: &str, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn hangup(&self, _chan: &Arc<Channel>) -> Result<()> {
        Ok(())
    }

    async fn answer(&self, _chan: &Arc<Channel>) -> Result<()> {
        Ok(())
    }

    async fn write(&self, _chan: &Arc<Channel>, _frame: Frame) -> Result<()> {
        Ok(())
    }

    async fn indicate(&self, _chan: &Arc<Channel>, _condition: ControlOp) -> Result<()> {
        Ok(())
    }

    async fn fixup(&self, _old: &Arc<Channel>, _new: &Arc<Channel>) -> Result<()> {
        Ok(())
    }

    async fn send_text(&self, _chan: &Arc<Channel>, _text: &str) -> Result<()> {
        Ok(())
    }

    async fn send_html(&self, _chan: &Arc<Channel>, _subclass: i32, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    async fn send_digit_begin(&self, _chan: &Arc<Channel>, _digit: char) -> Result<()> {
        Ok(())
    }

    async fn send_digit_end(
        &self,
        _chan: &Arc<Channel>,
        _digit: char,
        _duration: Duration,
    ) -> Result<()> {
        Ok(())
    }

    async fn query_option(
        &self,
        _chan: &Arc<Channel>,
        _option: QueryOption,
    ) -> Result<QueryOptionValue> {
        Ok(QueryOptionValue::T38(self.state))
    }
}

/// Bind a [`FaxTech`] to a channel, returning the keep-alive token for its
/// private state.
pub fn bind_fax_tech(
    chan: &Arc<Channel>,
    state: T38State,
) -> Arc<dyn std::any::Any + Send + Sync> {
    let pvt: Arc<dyn std::any::Any + Send + Sync> = Arc::new(());
    chan.bind_tech(Arc::new(FaxTech { state }), Arc::downgrade(&pvt));
    pvt
}
