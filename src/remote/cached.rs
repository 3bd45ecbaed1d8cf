//! Reference lookups that keep working from cache when the remote does not.

use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use super::{RemoteService, TAX_TEMPLATE_DOCTYPE};
use crate::cache::CacheRegistry;
use crate::error::{OfflineError, Result};

/// Wraps a [`RemoteService`] so reference data is cached on every successful
/// fetch and served from cache while offline or when the fetch fails.
#[derive(Clone)]
pub struct CachedLookups {
  remote: Arc<dyn RemoteService>,
  registry: Arc<CacheRegistry>,
}

impl CachedLookups {
  pub fn new(remote: Arc<dyn RemoteService>, registry: Arc<CacheRegistry>) -> Self {
    Self { remote, registry }
  }

  /// Tax template `name`. `None` means offline with nothing cached.
  pub async fn tax_template(&self, name: &str, offline: bool) -> Result<Option<Value>> {
    let cached = self.registry.tax_template(name);
    if offline {
      return Ok(cached);
    }

    match self.remote.get_doc(TAX_TEMPLATE_DOCTYPE, name).await {
      Ok(doc) => {
        self.registry.set_tax_template(name, &doc).await?;
        Ok(Some(doc))
      }
      Err(e) => match cached {
        Some(doc) => {
          warn!(template = %name, error = %e, "tax template fetch failed, using cached copy");
          Ok(Some(doc))
        }
        None => Err(OfflineError::Remote(e)),
      },
    }
  }

  /// Currency of `price_list`. `None` means offline with nothing cached.
  pub async fn price_list_currency(&self, price_list: &str, offline: bool) -> Result<Option<String>> {
    let cached = self.registry.price_list_currency(price_list);
    if offline {
      return Ok(cached);
    }

    match self.remote.get_price_list_currency(price_list).await {
      Ok(currency) => {
        self
          .registry
          .set_price_list_currency(price_list, &currency)
          .await;
        Ok(Some(currency))
      }
      Err(e) => match cached {
        Some(currency) => {
          warn!(%price_list, error = %e, "currency fetch failed, using cached value");
          Ok(Some(currency))
        }
        None => Err(OfflineError::Remote(e)),
      },
    }
  }
}
