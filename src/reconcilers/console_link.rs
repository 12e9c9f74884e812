//! Console link reconciler (OpenShift 4 only, TLS required).
//!
//! Adds the application to the OpenShift console application menu. Gated by
//! a discovery probe: clusters without the `ConsoleLink` kind make this a
//! noop. Cluster-scoped, so cleanup is finalizer-driven.

use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::ResourceExt;
use serde_json::json;
use tracing::warn;

use crate::client::console_link_resource;
use crate::context::{InfraFlavor, ReconcileContext};
use crate::finalizers::{append_finalizer, delete_finalizer};
use crate::labels::managed_labels;
use crate::reconcile::{Outcome, Reconciler};
use crate::sync::{sync_dynamic, DiffPolicy};
use crate::{Error, COMPONENT_CHE, CONSOLE_LINK_FINALIZER};

/// Reconciles the OpenShift console link
pub struct ConsoleLinkReconciler;

/// Name of the console link object
pub fn console_link_name(ctx: &ReconcileContext) -> String {
    ctx.flavor().to_string()
}

/// Build the ConsoleLink payload
pub fn build_console_link(ctx: &ReconcileContext, url: &str) -> DynamicObject {
    let resource = console_link_resource();
    let mut obj = DynamicObject::new(&console_link_name(ctx), &resource);
    obj.metadata.labels = Some(managed_labels(ctx.flavor(), COMPONENT_CHE));
    obj.data = json!({
        "spec": {
            "href": url,
            "location": "ApplicationMenu",
            "text": ctx.defaults.console_link_display_name,
            "applicationMenu": {
                "section": ctx.defaults.console_link_section,
                "imageURL": ctx.defaults.console_link_image,
            },
        }
    });
    obj
}

/// The link only exists on OpenShift 4 with TLS serving
pub fn console_link_applicable(ctx: &ReconcileContext) -> bool {
    ctx.infra == InfraFlavor::OpenShiftV4 && ctx.cr.spec.server.tls_support
}

#[async_trait]
impl Reconciler for ConsoleLinkReconciler {
    fn id(&self) -> &'static str {
        "ConsoleLinkReconciler"
    }

    async fn reconcile(&self, ctx: &ReconcileContext) -> Result<Outcome, Error> {
        if !console_link_applicable(ctx) {
            return Ok(Outcome::Done);
        }
        // optional API: absent kind makes this a noop
        if !ctx
            .client
            .supports_kind("console.openshift.io", "ConsoleLink")
            .await?
        {
            return Ok(Outcome::Done);
        }
        let Some(url) = ctx.che_url() else {
            return Ok(Outcome::requeue());
        };

        let desired = build_console_link(ctx, &url);
        if sync_dynamic(
            &ctx.client,
            &console_link_resource(),
            None,
            desired,
            None,
            &DiffPolicy::new(),
        )
        .await?
        .needs_requeue()
        {
            return Ok(Outcome::requeue());
        }

        append_finalizer(
            &ctx.client,
            &ctx.namespace,
            &ctx.cr.name_any(),
            CONSOLE_LINK_FINALIZER,
        )
        .await?;
        Ok(Outcome::Done)
    }

    async fn finalize(&self, ctx: &ReconcileContext) -> bool {
        match ctx
            .client
            .supports_kind("console.openshift.io", "ConsoleLink")
            .await
        {
            Ok(true) => {
                if let Err(e) = ctx
                    .client
                    .delete_dynamic(&console_link_resource(), None, &console_link_name(ctx))
                    .await
                {
                    warn!(error = %e, "failed to delete console link");
                    return false;
                }
            }
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, "console link discovery failed during finalize");
                return false;
            }
        }
        if let Err(e) = delete_finalizer(
            &ctx.client,
            &ctx.namespace,
            &ctx.cr.name_any(),
            CONSOLE_LINK_FINALIZER,
        )
        .await
        {
            warn!(error = %e, "failed to remove console link finalizer");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{test_context, test_context_openshift};

    #[test]
    fn applicable_only_on_openshift4_with_tls() {
        let mut ctx = test_context_openshift();
        assert!(!console_link_applicable(&ctx)); // no TLS
        ctx.cr.spec.server.tls_support = true;
        assert!(console_link_applicable(&ctx));

        ctx.infra = InfraFlavor::OpenShiftV3;
        assert!(!console_link_applicable(&ctx));

        let mut k8s_ctx = test_context();
        k8s_ctx.cr.spec.server.tls_support = true;
        assert!(!console_link_applicable(&k8s_ctx));
    }

    #[test]
    fn link_points_at_the_application_menu() {
        let ctx = test_context_openshift();
        let link = build_console_link(&ctx, "https://che.apps.example.org");
        assert_eq!(link.data["spec"]["href"], "https://che.apps.example.org");
        assert_eq!(link.data["spec"]["location"], "ApplicationMenu");
        assert_eq!(
            link.data["spec"]["applicationMenu"]["section"],
            "Red Hat Applications"
        );
    }
}
