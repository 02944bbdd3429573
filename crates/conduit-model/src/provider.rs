// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::{
    catalog::{InputModality, ModelCatalogEntry},
    CompletionRequest, ResponseEvent,
};

pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<ResponseEvent>> + Send>>;

/// A model provider: the lower-level abstraction a real agent runtime would
/// be built on top of. No provider here speaks an HTTP wire protocol (that
/// integration is a Non-goal); this trait exists so the shape of one is
/// grounded and testable against [`crate::mock`] providers.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;

    fn model_name(&self) -> &str;

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream>;

    /// Models available from this provider. Default: the static catalog
    /// entries, filtered by provider name.
    async fn list_models(&self) -> anyhow::Result<Vec<ModelCatalogEntry>> {
        let provider = self.name();
        Ok(crate::catalog::static_catalog().into_iter().filter(|e| e.provider == provider).collect())
    }

    fn catalog_max_output_tokens(&self) -> Option<u32> {
        crate::catalog::lookup(self.name(), self.model_name()).map(|e| e.max_output_tokens)
    }

    fn catalog_context_window(&self) -> Option<u32> {
        crate::catalog::lookup(self.name(), self.model_name()).map(|e| e.context_window)
    }

    fn input_modalities(&self) -> Vec<InputModality> {
        crate::catalog::lookup(self.name(), self.model_name()).map(|e| e.input_modalities).unwrap_or_else(|| vec![InputModality::Text])
    }

    fn supports_images(&self) -> bool {
        self.input_modalities().contains(&InputModality::Image)
    }
}
