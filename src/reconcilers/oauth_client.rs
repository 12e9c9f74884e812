//! OAuth client reconciler (OpenShift only).
//!
//! Registers a cluster-scoped `OAuthClient` with a generated secret and the
//! server's callback URL. Cluster-scoped means no owner reference: the
//! reconciler owns a finalizer and deletes the client on CR deletion. An
//! existing client keeps its secret so logins survive operator restarts.

use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::ResourceExt;
use serde_json::json;
use tracing::warn;

use crate::client::oauth_client_resource;
use crate::context::ReconcileContext;
use crate::finalizers::{append_finalizer, delete_finalizer};
use crate::labels::managed_labels;
use crate::reconcile::{Outcome, Reconciler};
use crate::reconcilers::secret::generate_password;
use crate::sync::{sync_dynamic, DiffPolicy};
use crate::{Error, COMPONENT_CHE, OAUTH_FINALIZER};

/// Reconciles the OpenShift OAuthClient
pub struct OAuthClientReconciler;

/// Effective OAuth client name: CR override or `<flavor>-<namespace>`
pub fn oauth_client_name(ctx: &ReconcileContext) -> String {
    ctx.cr
        .spec
        .auth
        .o_auth_client_name
        .clone()
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| format!("{}-{}", ctx.flavor(), ctx.namespace))
}

/// Build the OAuthClient payload
pub fn build_oauth_client(
    ctx: &ReconcileContext,
    name: &str,
    secret: &str,
    redirect_uris: &[String],
) -> DynamicObject {
    let resource = oauth_client_resource();
    let mut obj = DynamicObject::new(name, &resource);
    obj.metadata.labels = Some(managed_labels(ctx.flavor(), COMPONENT_CHE));
    obj.data = json!({
        "secret": secret,
        "redirectURIs": redirect_uris,
        "grantMethod": "prompt",
    });
    obj
}

/// Callback URLs registered with the OAuth server
pub fn redirect_uris(ctx: &ReconcileContext) -> Vec<String> {
    match ctx.che_url() {
        Some(url) => vec![format!("{url}/oauth/callback")],
        None => Vec::new(),
    }
}

#[async_trait]
impl Reconciler for OAuthClientReconciler {
    fn id(&self) -> &'static str {
        "OAuthClientReconciler"
    }

    async fn reconcile(&self, ctx: &ReconcileContext) -> Result<Outcome, Error> {
        if !ctx.is_openshift() || !ctx.cr.spec.auth.open_shift_oauth {
            return Ok(Outcome::Done);
        }
        let uris = redirect_uris(ctx);
        if uris.is_empty() {
            // host not resolvable yet; the exposure reconciler will assign it
            return Ok(Outcome::requeue());
        }

        let resource = oauth_client_resource();
        let name = oauth_client_name(ctx);

        // keep the live secret if the client exists, otherwise CR value or
        // a fresh one
        let existing = ctx.client.get_dynamic(&resource, None, &name).await?;
        let secret = existing
            .as_ref()
            .and_then(|c| c.data.get("secret"))
            .and_then(|s| s.as_str())
            .map(String::from)
            .or_else(|| ctx.cr.spec.auth.o_auth_secret.clone().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| generate_password(32));

        let desired = build_oauth_client(ctx, &name, &secret, &uris);
        if sync_dynamic(&ctx.client, &resource, None, desired, None, &DiffPolicy::new())
            .await?
            .needs_requeue()
        {
            return Ok(Outcome::requeue());
        }

        append_finalizer(&ctx.client, &ctx.namespace, &ctx.cr.name_any(), OAUTH_FINALIZER).await?;
        Ok(Outcome::Done)
    }

    async fn finalize(&self, ctx: &ReconcileContext) -> bool {
        let name = oauth_client_name(ctx);
        if let Err(e) = ctx
            .client
            .delete_dynamic(&oauth_client_resource(), None, &name)
            .await
        {
            warn!(error = %e, "failed to delete oauth client");
            return false;
        }
        if let Err(e) = delete_finalizer(
            &ctx.client,
            &ctx.namespace,
            &ctx.cr.name_any(),
            OAUTH_FINALIZER,
        )
        .await
        {
            warn!(error = %e, "failed to remove oauth finalizer");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_context_openshift;

    #[test]
    fn client_name_prefers_cr_override() {
        let mut ctx = test_context_openshift();
        assert_eq!(oauth_client_name(&ctx), "che-eclipse-che");
        ctx.cr.spec.auth.o_auth_client_name = Some("custom-client".to_string());
        assert_eq!(oauth_client_name(&ctx), "custom-client");
    }

    #[test]
    fn redirect_uri_follows_the_public_url() {
        let mut ctx = test_context_openshift();
        ctx.cr.spec.server.che_host = Some("che.apps.example.org".to_string());
        ctx.cr.spec.server.tls_support = true;
        assert_eq!(
            redirect_uris(&ctx),
            vec!["https://che.apps.example.org/oauth/callback"]
        );
    }

    #[test]
    fn payload_carries_secret_and_grant_method() {
        let mut ctx = test_context_openshift();
        ctx.cr.spec.server.che_host = Some("che.apps.example.org".to_string());
        let obj = build_oauth_client(&ctx, "che-eclipse-che", "s3cret", &redirect_uris(&ctx));
        assert_eq!(obj.data["secret"], "s3cret");
        assert_eq!(obj.data["grantMethod"], "prompt");
        assert!(obj.metadata.namespace.is_none());
    }
}
