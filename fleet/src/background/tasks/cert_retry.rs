// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Background task retrying certificate issuance
//!
//! The pipeline's certificate step is best-effort; tenants it could not get
//! a certificate for stay on plaintext routing.  This cycle retries issuance
//! for any active local tenant still missing one.

use crate::background::BackgroundTask;
use crate::db::model::TenantState;
use crate::db::DataStore;
use crate::interfaces::certificates::CertificateIssuer;
use futures::future::BoxFuture;
use futures::FutureExt;
use slog::Logger;
use std::sync::Arc;
use uuid::Uuid;

pub struct CertificateRefresh {
    datastore: Arc<DataStore>,
    server_id: Uuid,
    issuer: Arc<dyn CertificateIssuer>,
}

impl CertificateRefresh {
    pub fn new(
        datastore: Arc<DataStore>,
        server_id: Uuid,
        issuer: Arc<dyn CertificateIssuer>,
    ) -> Self {
        CertificateRefresh { datastore, server_id, issuer }
    }
}

impl BackgroundTask for CertificateRefresh {
    fn activate<'a>(
        &'a mut self,
        log: &'a Logger,
    ) -> BoxFuture<'a, serde_json::Value> {
        async move {
            let tenants = match self
                .datastore
                .tenant_list_on_server(self.server_id, TenantState::Active)
                .await
            {
                Ok(tenants) => tenants,
                Err(error) => {
                    error!(
                        log,
                        "failed to list tenants for certificate retry";
                        "error" => %error,
                    );
                    return serde_json::json!({ "error": error.to_string() });
                }
            };

            let mut issued = 0;
            let mut failed = 0;
            for tenant in &tenants {
                match self.issuer.has_certificate(&tenant.domain).await {
                    Ok(true) => continue,
                    Ok(false) => {}
                    Err(error) => {
                        warn!(
                            log,
                            "could not determine certificate presence";
                            "domain" => &tenant.domain,
                            "error" => %error,
                        );
                        failed += 1;
                        continue;
                    }
                }
                match self.issuer.ensure_certificate(&tenant.domain).await {
                    Ok(()) => {
                        info!(
                            log,
                            "issued certificate on retry";
                            "domain" => &tenant.domain,
                        );
                        issued += 1;
                    }
                    Err(error) => {
                        // Still best-effort; the next cycle tries again.
                        warn!(
                            log,
                            "certificate issuance retry failed";
                            "domain" => &tenant.domain,
                            "error" => %error,
                        );
                        failed += 1;
                    }
                }
            }
            serde_json::json!({ "issued": issued, "failed": failed })
        }
        .boxed()
    }
}
