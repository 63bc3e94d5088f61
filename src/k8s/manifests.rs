//! Kubernetes manifest rendering
//!
//! The remote agent is projected onto the cluster as three resources:
//! a Namespace per run, a single-replica Deployment running the `remote`
//! subcommand, and a Service exposing the three ports. Variables are
//! substituted textually before the manifests are applied.

use crate::APP_NAME;

/// Per-run configuration shared by the manifests and the orchestrator.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Run name (user-supplied or generated).
    pub name: String,
    /// Namespace for this run: `reversepf-<name>`.
    pub namespace: String,
    /// Remote agent container image.
    pub image: String,
    /// Port the control server listens on.
    pub control_server_port: u16,
    /// Port the portal listens on.
    pub portal_port: u16,
    /// Port the Kubernetes service exposes to the cluster.
    pub service_port: u16,
}

impl RunConfig {
    /// Build the configuration for a named run.
    pub fn new(
        name: &str,
        image: &str,
        control_server_port: u16,
        portal_port: u16,
        service_port: u16,
    ) -> Self {
        Self {
            name: name.to_string(),
            namespace: format!("{APP_NAME}-{name}"),
            image: image.to_string(),
            control_server_port,
            portal_port,
            service_port,
        }
    }

    /// Cluster DNS target other workloads use to reach the local service.
    pub fn dns_target(&self) -> String {
        format!("{}.{}:{}", APP_NAME, self.namespace, self.service_port)
    }
}

/// Namespace manifest for a run.
pub fn namespace_manifest(config: &RunConfig) -> String {
    format!(
        r#"apiVersion: v1
kind: Namespace
metadata:
  name: {namespace}
"#,
        namespace = config.namespace,
    )
}

/// Deployment manifest launching the remote agent with the three ports.
pub fn deployment_manifest(config: &RunConfig) -> String {
    format!(
        r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: {app}
  namespace: {namespace}
  labels:
    app: {app}
spec:
  selector:
    matchLabels:
      app: {app}
  replicas: 1
  template:
    metadata:
      labels:
        app: {app}
    spec:
      containers:
        - name: {app}
          image: {image}
          imagePullPolicy: IfNotPresent
          args:
            - "remote"
            - "--service-port"
            - "{service_port}"
            - "--control-server-port"
            - "{control_server_port}"
            - "--portal-port"
            - "{portal_port}"
          resources:
            requests:
              cpu: 100m
              memory: 100Mi
      restartPolicy: Always
"#,
        app = APP_NAME,
        namespace = config.namespace,
        image = config.image,
        service_port = config.service_port,
        control_server_port = config.control_server_port,
        portal_port = config.portal_port,
    )
}

/// Service manifest exposing all three ports by name.
pub fn service_manifest(config: &RunConfig) -> String {
    format!(
        r#"apiVersion: v1
kind: Service
metadata:
  name: {app}
  namespace: {namespace}
spec:
  selector:
    app: {app}
  ports:
    - port: {control_server_port}
      name: control-server
      protocol: TCP
    - port: {portal_port}
      name: portal-port
      protocol: TCP
    - port: {service_port}
      name: service
      protocol: TCP
"#,
        app = APP_NAME,
        namespace = config.namespace,
        control_server_port = config.control_server_port,
        portal_port = config.portal_port,
        service_port = config.service_port,
    )
}
