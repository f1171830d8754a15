//! The switch core: driver registry, channel directory, and the dialplan
//! services drivers consume.
//!
//! One [`SwitchCore`] is one isolated switch instance. Nothing here is
//! process-global; tests build as many cores as they need.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::channel::{Channel, ChannelId, ChannelParams, ChannelState};
use crate::dialplan::{Dialplan, PbxRunner};
use crate::errors::{Result, SwitchError};
use crate::format::FormatCap;
use crate::tech::ChannelTech;

/// One switch instance.
pub struct SwitchCore {
    techs: DashMap<String, Arc<dyn ChannelTech>>,
    channels: DashMap<ChannelId, Arc<Channel>>,
    dialplan: Arc<dyn Dialplan>,
    pbx: Arc<dyn PbxRunner>,
}

impl SwitchCore {
    pub fn new(dialplan: Arc<dyn Dialplan>, pbx: Arc<dyn PbxRunner>) -> Arc<SwitchCore> {
        Arc::new(SwitchCore {
            techs: DashMap::new(),
            channels: DashMap::new(),
            dialplan,
            pbx,
        })
    }

    pub fn dialplan(&self) -> &Arc<dyn Dialplan> {
        &self.dialplan
    }

    pub fn pbx(&self) -> &Arc<dyn PbxRunner> {
        &self.pbx
    }

    /// Register a channel driver under its technology name.
    pub fn register_tech(&self, tech: Arc<dyn ChannelTech>) -> Result<()> {
        let name = tech.type_name().to_string();
        if self.techs.contains_key(&name) {
            return Err(SwitchError::TechAlreadyRegistered(name));
        }
        info!("registered channel driver '{}' ({})", name, tech.description());
        self.techs.insert(name, tech);
        Ok(())
    }

    /// Remove a channel driver registration.
    pub fn unregister_tech(&self, type_name: &str) -> Option<Arc<dyn ChannelTech>> {
        let removed = self.techs.remove(type_name).map(|(_, tech)| tech);
        if removed.is_some() {
            info!("unregistered channel driver '{}'", type_name);
        }
        removed
    }

    pub fn tech(&self, type_name: &str) -> Option<Arc<dyn ChannelTech>> {
        self.techs.get(type_name).map(|t| t.value().clone())
    }

    /// Allocate a channel and enter it into the directory. Fails if the name
    /// is already taken.
    pub fn alloc_channel(&self, params: ChannelParams) -> Result<Arc<Channel>> {
        if self.channel_by_name(&params.name).is_some() {
            return Err(SwitchError::Allocation(format!(
                "channel name '{}' already in use",
                params.name
            )));
        }
        let chan = Channel::new(params);
        debug!("allocated channel '{}'", chan.name());
        self.channels.insert(chan.id(), chan.clone());
        Ok(chan)
    }

    /// Drop a channel from the directory without driver involvement. Used to
    /// unwind half-built allocations.
    pub fn release_channel(&self, chan: &Arc<Channel>) {
        self.channels.remove(&chan.id());
    }

    /// Find a live channel by name.
    pub fn channel_by_name(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels
            .iter()
            .find(|entry| entry.value().name() == name)
            .map(|entry| entry.value().clone())
    }

    /// Number of live channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Ask a driver for a new channel toward `dest`.
    pub async fn request(
        &self,
        type_name: &str,
        dest: &str,
        format: FormatCap,
        requestor: Option<&Arc<Channel>>,
    ) -> Result<Arc<Channel>> {
        let tech = self
            .tech(type_name)
            .ok_or_else(|| SwitchError::NoSuchTech(type_name.to_string()))?;
        tech.requester(dest, format, requestor).await
    }

    /// Hang a channel up: dispatch the driver's hangup, then retire the
    /// channel from the directory.
    pub async fn hangup_channel(&self, chan: &Arc<Channel>) -> Result<()> {
        let binding = chan.tech_binding();
        let res = match binding {
            Some(b) => b.tech.hangup(chan).await,
            None => Ok(()),
        };
        {
            let mut guard = chan.lock().await;
            guard.softhangup = true;
            guard.set_state(ChannelState::Down);
        }
        self.channels.remove(&chan.id());
        debug!("released channel '{}'", chan.name());
        res
    }
}
