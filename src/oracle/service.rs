// This file is part of TRINCI.
//
// Copyright (C) 2021 Affidaty Spa.
//
// TRINCI is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the
// Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// TRINCI is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License
// for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with TRINCI. If not, see <https://www.gnu.org/licenses/>.

//! Oracle node service.

use super::{
    config::{OracleConfig, OverrideSource},
    feeder::PriceSource,
    task,
    worker::OracleWorker,
};
use crate::{
    chain::{BlockchainClient, Registry},
    consensus::{SignRequestHandler, SignatureRequester},
    crypto::KeyPair,
    Result,
};
use async_std::channel::{self, Sender};
use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

/// Oracle service data.
pub struct OracleService {
    /// Node configuration.
    config: Arc<OracleConfig>,
    /// Markets and co-sign handler.
    worker: Arc<OracleWorker>,
    /// Worker thread handler.
    handle: Option<JoinHandle<()>>,
    /// To ask the worker thread to stop.
    stop_chan: Option<Sender<()>>,
    /// To check if the worker thread is alive.
    canary: Arc<()>,
}

impl OracleService {
    pub fn new<O: OverrideSource>(
        client: Arc<dyn BlockchainClient>,
        registry: Arc<dyn Registry>,
        overrides: O,
        keypair: KeyPair,
        source: Arc<dyn PriceSource>,
        requester: Arc<dyn SignatureRequester>,
    ) -> Self {
        let config = Arc::new(OracleConfig::new(registry, overrides));
        let worker = Arc::new(OracleWorker::new(
            client,
            config.clone(),
            Arc::new(keypair),
            source,
            requester,
        ));
        OracleService {
            config,
            worker,
            handle: None,
            stop_chan: None,
            canary: Arc::new(()),
        }
    }

    /// Start the service.
    ///
    /// Fails if the configuration cannot be resolved.
    pub fn start(&mut self) -> Result<()> {
        debug!("Starting oracle service");
        if self.is_running() {
            warn!("service was already running");
            return Ok(());
        }
        async_std::task::block_on(self.config.initialize())?;

        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let config = self.config.clone();
        let worker = self.worker.clone();
        let mut canary = Arc::clone(&self.canary);
        let handle = thread::spawn(move || {
            let _ = Arc::get_mut(&mut canary);
            async_std::task::block_on(async move {
                let config_task = task::spawn(config);
                let main_task = task::spawn(worker.clone());
                let _ = stop_rx.recv().await;
                main_task.stop().await;
                config_task.stop().await;
                worker.stop_all().await;
            });
        });
        self.handle = Some(handle);
        self.stop_chan = Some(stop_tx);
        Ok(())
    }

    /// Stop the service.
    pub fn stop(&mut self) {
        debug!("Stopping oracle service");
        match (self.handle.take(), self.stop_chan.take()) {
            (Some(handle), Some(stop_chan)) => {
                if let Err(err) = stop_chan.try_send(()) {
                    error!("Error stopping oracle service thread: {:?}", err);
                }
                if handle.join().is_err() {
                    error!("oracle service thread panicked");
                }
                debug!("oracle service stopped");
            }
            _ => debug!("service was not running"),
        }
    }

    /// Check if service is running.
    pub fn is_running(&self) -> bool {
        // Hack to intercept crashed subthreads.
        Arc::strong_count(&self.canary) == 2
    }

    pub fn config(&self) -> Arc<OracleConfig> {
        self.config.clone()
    }

    /// Handler to plug into the co-sign server.
    pub fn sign_handler(&self) -> Arc<dyn SignRequestHandler> {
        self.worker.clone()
    }
}
