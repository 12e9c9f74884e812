//! Secret reconciler.
//!
//! Generated credentials: the postgres password and the OAuth client secret
//! when the CR leaves them unset. Generated secrets are create-once: an
//! existing secret is never regenerated, otherwise every tick would rotate
//! credentials out from under running components.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use rand::distr::Alphanumeric;
use rand::Rng;
use tracing::info;

use crate::context::ReconcileContext;
use crate::labels::managed_labels;
use crate::reconcile::{Outcome, Reconciler};
use crate::sync::set_controller_owner;
use crate::{Error, COMPONENT_POSTGRES};

/// Name of the generated postgres credentials secret
pub const POSTGRES_CREDENTIALS_SECRET: &str = "che-postgres-secret";

/// Reconciles generated credential secrets
pub struct SecretReconciler;

/// Generate a random alphanumeric credential
pub fn generate_password(length: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Build an opaque secret with string data
pub fn build_opaque_secret(
    name: &str,
    namespace: &str,
    flavor: &str,
    component: &str,
    data: BTreeMap<String, String>,
) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(managed_labels(flavor, component)),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(
            data.into_iter()
                .map(|(k, v)| (k, ByteString(v.into_bytes())))
                .collect(),
        ),
        ..Default::default()
    }
}

/// Create the secret if absent; an existing one is left untouched
async fn ensure_secret_once(ctx: &ReconcileContext, mut secret: Secret) -> Result<(), Error> {
    let name = secret.metadata.name.clone().unwrap_or_default();
    if ctx
        .client
        .get_cached::<Secret>(&ctx.namespace, &name)
        .await?
        .is_some()
    {
        return Ok(());
    }
    set_controller_owner(&mut secret.metadata, &ctx.owner_reference());
    match ctx.client.create(&ctx.namespace, &secret).await {
        Ok(_) => {
            info!(secret = %name, "credential secret created");
            Ok(())
        }
        // lost a create race: the winner's credentials stand
        Err(e) if e.api_kind() == crate::error::ApiErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl Reconciler for SecretReconciler {
    fn id(&self) -> &'static str {
        "SecretReconciler"
    }

    async fn reconcile(&self, ctx: &ReconcileContext) -> Result<Outcome, Error> {
        let db = &ctx.cr.spec.database;
        if !db.external_db {
            let password = db
                .che_postgres_password
                .clone()
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| generate_password(12));
            let mut data = BTreeMap::new();
            data.insert(
                "user".to_string(),
                db.che_postgres_user.clone().unwrap_or_else(|| "pgche".to_string()),
            );
            data.insert("password".to_string(), password);

            let secret = build_opaque_secret(
                POSTGRES_CREDENTIALS_SECRET,
                &ctx.namespace,
                ctx.flavor(),
                COMPONENT_POSTGRES,
                data,
            );
            ensure_secret_once(ctx, secret).await?;
        }

        Ok(Outcome::Done)
    }

    async fn finalize(&self, _ctx: &ReconcileContext) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_passwords_are_alphanumeric_and_sized() {
        let password = generate_password(12);
        assert_eq!(password.len(), 12);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
        // two generations differ (overwhelmingly)
        assert_ne!(generate_password(12), generate_password(12));
    }

    #[test]
    fn opaque_secret_encodes_string_data() {
        let mut data = BTreeMap::new();
        data.insert("user".to_string(), "pgche".to_string());
        let secret =
            build_opaque_secret("che-postgres-secret", "eclipse-che", "che", COMPONENT_POSTGRES, data);

        assert_eq!(secret.type_.as_deref(), Some("Opaque"));
        let stored = secret.data.unwrap();
        assert_eq!(stored.get("user").unwrap().0, b"pgche");
    }
}
