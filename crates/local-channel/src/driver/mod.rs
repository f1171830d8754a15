//! The Local channel driver.
//!
//! `LocalDriver` implements the switch's channel-driver contract for the
//! `Local` technology: a destination like `1000@internal/n` materializes as
//! a pair of back-to-back endpoints wired through one [`LocalPair`]. The
//! caller-facing endpoint (`;1`) is handed to whoever requested the channel;
//! the dialplan endpoint (`;2`) runs the extension script once `call` fires.

mod adapter;
mod call;
mod hangup;

use std::any::Any;
use std::sync::{Arc, Weak};

use crosspoint_switch_core::{
    best_codec, AmaFlags, CcConfig, Channel, ChannelParams, ChannelState, ChannelTech, FormatCap,
    JitterBufferConfig, ModuleUse, Result, SwitchCore, SwitchError,
};
use tracing::{debug, warn};

use crate::pair::{parse_destination, LocalPair};
use crate::registry::LocalRegistry;

/// Technology name the driver registers under.
pub const TECH_NAME: &str = "Local";

/// The Local proxy channel driver. One instance per switch core; holds the
/// registry of live pairs and the module use counter that pins the driver
/// while endpoints exist.
pub struct LocalDriver {
    me: Weak<LocalDriver>,
    core: Arc<SwitchCore>,
    registry: LocalRegistry,
    module: Arc<ModuleUse>,
    jb_defaults: JitterBufferConfig,
}

impl LocalDriver {
    pub fn new(core: Arc<SwitchCore>) -> Arc<LocalDriver> {
        Self::with_jitter_defaults(core, JitterBufferConfig::default())
    }

    /// Build a driver whose `j`-option pairs start from the given jitter
    /// buffer defaults.
    pub fn with_jitter_defaults(
        core: Arc<SwitchCore>,
        jb_defaults: JitterBufferConfig,
    ) -> Arc<LocalDriver> {
        Arc::new_cyclic(|me| LocalDriver {
            me: me.clone(),
            core,
            registry: LocalRegistry::new(),
            module: ModuleUse::new(),
            jb_defaults,
        })
    }

    /// Register the driver with its switch core.
    pub fn register(self: &Arc<Self>) -> Result<()> {
        self.core.register_tech(self.clone())
    }

    /// Tear the driver down: ask every live pair's caller-facing endpoint to
    /// hang up, then withdraw the registration.
    pub async fn unload(&self) -> Result<()> {
        for pair in self.registry.snapshot() {
            let owner = {
                let state = pair.lock_state().await;
                state.owner.clone()
            };
            if let Some(owner) = owner {
                let mut guard = owner.lock().await;
                guard.queue_hangup();
            }
        }
        self.core.unregister_tech(TECH_NAME);
        Ok(())
    }

    pub fn core(&self) -> &Arc<SwitchCore> {
        &self.core
    }

    pub fn registry(&self) -> &LocalRegistry {
        &self.registry
    }

    pub fn module(&self) -> &Arc<ModuleUse> {
        &self.module
    }

    fn tech_arc(&self) -> Option<Arc<dyn ChannelTech>> {
        self.me.upgrade().map(|me| me as Arc<dyn ChannelTech>)
    }

    /// Create a new pair for `dest` and return its caller-facing endpoint.
    pub async fn request(
        &self,
        dest: &str,
        format: FormatCap,
        requestor: Option<&Arc<Channel>>,
    ) -> Result<Arc<Channel>> {
        let Some(tech) = self.tech_arc() else {
            return Err(SwitchError::Internal("driver already torn down".into()));
        };

        let parsed = parse_destination(dest);
        let mut jb_conf = self.jb_defaults.clone();
        if parsed.jb_enabled {
            jb_conf.enabled = true;
        }
        let pair = LocalPair::new(&parsed, format, jb_conf);
        self.registry.insert(pair.clone());

        let (linkedid, cc) = match requestor {
            Some(requestor) => {
                let guard = requestor.lock().await;
                (guard.linkedid.clone(), guard.cc.clone())
            }
            None => (String::new(), CcConfig::default()),
        };

        let tag: u16 = rand::random();
        let base = format!("Local/{}@{}-{:04x}", pair.exten(), pair.context(), tag);

        let owner = match self.core.alloc_channel(ChannelParams {
            name: format!("{base};1"),
            state: ChannelState::Down,
            exten: pair.exten().to_string(),
            context: pair.context().to_string(),
            linkedid: linkedid.clone(),
            accountcode: String::new(),
            amaflags: AmaFlags::Unset,
        }) {
            Ok(chan) => chan,
            Err(e) => {
                warn!("unable to allocate channel structures for '{}'", dest);
                self.registry.remove(pair.id());
                pair.destroy();
                return Err(e);
            }
        };
        let outbound = match self.core.alloc_channel(ChannelParams {
            name: format!("{base};2"),
            state: ChannelState::Ring,
            exten: pair.exten().to_string(),
            context: pair.context().to_string(),
            linkedid,
            accountcode: String::new(),
            amaflags: AmaFlags::Unset,
        }) {
            Ok(chan) => chan,
            Err(e) => {
                warn!("unable to allocate channel structures for '{}'", dest);
                self.core.release_channel(&owner);
                self.registry.remove(pair.id());
                pair.destroy();
                return Err(e);
            }
        };

        let fmt = best_codec(pair.reqformat());
        for chan in [&owner, &outbound] {
            let mut guard = chan.lock().await;
            guard.nativeformats = pair.reqformat();
            guard.readformat = fmt;
            guard.writeformat = fmt;
            guard.priority = 1;
        }
        {
            let mut guard = owner.lock().await;
            guard.jitter = pair.jb_conf().clone();
            guard.cc = cc;
        }

        let pvt: Weak<dyn Any + Send + Sync> = {
            let erased: Arc<dyn Any + Send + Sync> = pair.clone();
            Arc::downgrade(&erased)
        };
        owner.bind_tech(tech.clone(), pvt.clone());
        outbound.bind_tech(tech, pvt);

        {
            let mut state = pair.lock_state().await;
            state.owner = Some(owner.clone());
            state.outbound = Some(outbound.clone());
            state.u_owner = Some(self.module.add_user());
            state.u_outbound = Some(self.module.add_user());
        }

        debug!("created local pair '{base}' for '{dest}'");
        Ok(owner)
    }
}

/// Shared "tech_pvt is gone" error used across the adapter surface.
pub(crate) fn no_pvt(chan: &Arc<Channel>) -> SwitchError {
    SwitchError::Internal(format!("channel '{}' has no local state", chan.name()))
}
