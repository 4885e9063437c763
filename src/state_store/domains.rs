use std::{collections::HashSet, time::Duration};

use tracing::debug;

use super::{keys, Error, StateStore};
use crate::data_model::Domain;

impl StateStore {
    /// Marks `name` fresh for `ttl`. A zero TTL keeps the domain fresh
    /// until it is upserted again with a non-zero one.
    pub async fn upsert_domain(&self, name: &str, ttl: Duration) -> Result<(), Error> {
        if name.is_empty() {
            return Err(Error::InvalidRequest {
                reason: "domain name is empty".to_string(),
            });
        }
        let key = keys::domain_key(name);
        let domain = Domain {
            name: name.to_string(),
        };
        let ttl = Some(ttl);

        match self.read_optional::<Domain>(&key).await? {
            Some(record) => {
                self.swap_record(&key, &domain, ttl, record.version)
                    .await?;
            }
            None => {
                self.create_record(&key, &domain, ttl).await?;
            }
        }
        debug!(domain = name, "upserted domain");
        Ok(())
    }

    /// Names of the domains that are currently fresh.
    pub async fn domains(&self) -> Result<HashSet<String>, Error> {
        let (records, _) = self.read_tree::<Domain>(keys::DOMAIN_ROOT).await?;
        Ok(records.into_iter().map(|r| r.value.name).collect())
    }
}
