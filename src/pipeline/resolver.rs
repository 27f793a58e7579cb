use std::{sync::Arc, time::Duration};

use tracing::{debug, error, info, warn};

use crate::{
    error::ValidationError,
    models::{priority::Tier, request::NotificationRequest},
    pipeline::ports::{PriorityCache, TemplateStore},
};

/// Tier used whenever a template lookup cannot produce one.
pub const DEFAULT_TIER: Tier = Tier::Medium;

/// Decides the tier of a request: explicit value, else the template's cached or
/// stored priority, else [`DEFAULT_TIER`].
///
/// Lookups never fail a request. The only side effect is the cache write after a
/// store hit; the store itself is read-only here.
pub struct PriorityResolver {
    cache: Arc<dyn PriorityCache>,
    templates: Arc<dyn TemplateStore>,
    cache_ttl: Duration,
}

impl PriorityResolver {
    pub fn new(
        cache: Arc<dyn PriorityCache>,
        templates: Arc<dyn TemplateStore>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            cache,
            templates,
            cache_ttl,
        }
    }

    pub async fn resolve(&self, request: &NotificationRequest) -> Result<Tier, ValidationError> {
        if let Some(tier) = request.requested_tier()? {
            return Ok(tier);
        }

        match request.template_name() {
            Some(template_name) => Ok(self.resolve_template(template_name).await),
            None => {
                debug!(
                    user_id = %request.recipient.user_id,
                    "No priority or template given, assigning default tier"
                );
                Ok(DEFAULT_TIER)
            }
        }
    }

    async fn resolve_template(&self, template_name: &str) -> Tier {
        if let Some(tier) = self.cached_tier(template_name).await {
            return tier;
        }

        let template = match self.templates.find_template_by_name(template_name).await {
            Ok(Some(template)) => template,
            Ok(None) => {
                warn!(
                    template_name,
                    default_tier = %DEFAULT_TIER,
                    "Template not found, assigning default tier"
                );
                return DEFAULT_TIER;
            }
            Err(e) => {
                error!(
                    template_name,
                    error = %e,
                    default_tier = %DEFAULT_TIER,
                    "Template lookup failed, assigning default tier"
                );
                return DEFAULT_TIER;
            }
        };

        let Some(tier) = Tier::from_i32(template.priority) else {
            warn!(
                template_name,
                stored_priority = template.priority,
                default_tier = %DEFAULT_TIER,
                "Template has an invalid priority, assigning default tier"
            );
            return DEFAULT_TIER;
        };

        if let Err(e) = self
            .cache
            .set(template_name, &tier.to_string(), self.cache_ttl)
            .await
        {
            warn!(template_name, error = %e, "Failed to cache template priority");
        }

        tier
    }

    async fn cached_tier(&self, template_name: &str) -> Option<Tier> {
        match self.cache.get(template_name).await {
            Ok(Some(value)) => match Tier::parse(&value) {
                Some(tier) => {
                    info!(template_name, tier = %tier, "Retrieved template priority from cache");
                    Some(tier)
                }
                None => {
                    warn!(
                        template_name,
                        cached_value = %value,
                        "Ignoring unparsable cached priority"
                    );
                    None
                }
            },
            Ok(None) => {
                info!(template_name, "Template priority not cached");
                None
            }
            Err(e) => {
                error!(template_name, error = %e, "Priority cache lookup failed");
                None
            }
        }
    }
}
