use anyhow::Context;
use chrono::Utc;
use futures::future::join_all;
use k8s_openapi::api::apps::v1::{
    Deployment as KubeDeployment, DeploymentStatus as KubeDeploymentStatus,
};
use k8s_openapi::api::autoscaling::v1::ScaleSpec;
use k8s_openapi::api::core::v1::{ContainerStatus, Namespace, Pod};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Api, ListParams, LogParams, PostParams};
use kube::{Client, Config, ResourceExt};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::{
    ContainerResources, ContainerSpec, ContainerStatusInfo, Deployment, DeploymentDetail,
    DeploymentHealth, PodInfo, ReplicaInfo, ResourceQuantities,
};

#[derive(Clone)]
pub struct ClusterClient {
    client: Client,
}

impl ClusterClient {
    pub async fn connect() -> anyhow::Result<Self> {
        let config = Config::infer()
            .await
            .context("failed to infer Kubernetes configuration")?;
        let cluster_url = config.cluster_url.to_string();
        let client = Client::try_from(config).context("failed to initialize Kubernetes client")?;
        debug!("using cluster {cluster_url}");
        Ok(Self { client })
    }

    #[cfg(test)]
    pub(crate) fn from_client(client: Client) -> Self {
        Self { client }
    }

    pub(crate) fn client(&self) -> Client {
        self.client.clone()
    }

    pub async fn server_version(&self) -> Option<String> {
        match self.client.apiserver_version().await {
            Ok(info) => Some(info.git_version),
            Err(error) => {
                debug!("API server version probe failed: {error}");
                None
            }
        }
    }

    /// Non-excluded namespace names, sorted. A failed listing degrades to an
    /// empty result rather than propagating.
    pub async fn namespaces(&self, exclude: &[String]) -> Vec<String> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = match api.list(&list_params()).await {
            Ok(list) => list,
            Err(error) => {
                warn!("failed to list namespaces: {error}");
                return Vec::new();
            }
        };

        let mut names = list
            .into_iter()
            .filter_map(|namespace| namespace.metadata.name)
            .filter(|name| {
                !exclude
                    .iter()
                    .any(|excluded| excluded.eq_ignore_ascii_case(name))
            })
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    /// Deployments across every non-excluded namespace. Namespaces whose
    /// fetch fails are skipped so one broken namespace cannot take down the
    /// whole listing.
    pub async fn all_deployments(&self, exclude: &[String]) -> Vec<Deployment> {
        let namespaces = self.namespaces(exclude).await;
        let fetches = namespaces.iter().map(|namespace| self.deployments(namespace));

        let mut all = Vec::new();
        for (namespace, result) in namespaces.iter().zip(join_all(fetches).await) {
            match result {
                Ok(mut deployments) => all.append(&mut deployments),
                Err(error) => warn!("skipping namespace {namespace}: {error}"),
            }
        }
        all
    }

    pub async fn deployments(&self, namespace: &str) -> Result<Vec<Deployment>> {
        let api: Api<KubeDeployment> = Api::namespaced(self.client.clone(), namespace);
        let params = list_params();
        let (list, urls) = tokio::join!(api.list(&params), self.ingress_urls(namespace));
        let list = list?;

        Ok(list
            .into_iter()
            .map(|item| {
                let item_urls = resolve_urls(&item, &urls);
                map_deployment(item, item_urls)
            })
            .collect())
    }

    pub async fn deployment(&self, namespace: &str, name: &str) -> Result<Deployment> {
        let api: Api<KubeDeployment> = Api::namespaced(self.client.clone(), namespace);
        let item = api
            .get(name)
            .await
            .map_err(|error| api_error(error, "deployment", namespace, name))?;
        Ok(map_deployment(item, Vec::new()))
    }

    pub async fn deployment_detail(&self, namespace: &str, name: &str) -> Result<DeploymentDetail> {
        let api: Api<KubeDeployment> = Api::namespaced(self.client.clone(), namespace);
        let item = api
            .get(name)
            .await
            .map_err(|error| api_error(error, "deployment", namespace, name))?;

        let selector = item
            .spec
            .as_ref()
            .and_then(|spec| spec.selector.match_labels.clone())
            .unwrap_or_default();
        let (pods, urls) = tokio::join!(
            self.selected_pods(namespace, &selector),
            self.ingress_urls(namespace)
        );
        let pods = pods?;

        let containers = container_specs(&item);
        let item_urls = resolve_urls(&item, &urls);
        Ok(DeploymentDetail {
            deployment: map_deployment(item, item_urls),
            pods,
            containers,
        })
    }

    /// Read-then-write of the deployment's scale subresource.
    pub async fn scale_deployment(&self, namespace: &str, name: &str, replicas: i32) -> Result<()> {
        let api: Api<KubeDeployment> = Api::namespaced(self.client.clone(), namespace);
        let mut scale = api
            .get_scale(name)
            .await
            .map_err(|error| api_error(error, "deployment", namespace, name))?;
        scale.spec = Some(ScaleSpec {
            replicas: Some(replicas),
        });

        api.replace_scale(name, &PostParams::default(), &scale)
            .await
            .map_err(|error| api_error(error, "deployment", namespace, name))?;
        Ok(())
    }

    pub async fn pod_logs(
        &self,
        namespace: &str,
        pod_name: &str,
        container: Option<&str>,
        tail_lines: i64,
    ) -> Result<String> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            container: container.map(str::to_string),
            tail_lines: Some(tail_lines),
            ..LogParams::default()
        };

        api.logs(pod_name, &params)
            .await
            .map_err(|error| api_error(error, "pod", namespace, pod_name))
    }

    /// release → reachable URLs for a namespace. Best effort: a failed
    /// listing degrades to an empty map so URL annotation never blocks.
    async fn ingress_urls(&self, namespace: &str) -> BTreeMap<String, Vec<String>> {
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);
        match api.list(&list_params()).await {
            Ok(list) => correlate_ingresses(list.items),
            Err(error) => {
                warn!("failed to list ingresses in {namespace}: {error}");
                BTreeMap::new()
            }
        }
    }

    async fn selected_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<PodInfo>> {
        if selector.is_empty() {
            return Ok(Vec::new());
        }

        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = list_params().labels(&selector_query(selector));
        let list = api.list(&params).await?;
        Ok(list.items.iter().map(pod_info).collect())
    }
}

fn classify_health(desired: i32, status: Option<&KubeDeploymentStatus>) -> DeploymentHealth {
    if desired == 0 {
        return DeploymentHealth::ScaledToZero;
    }

    let ready = status.and_then(|status| status.ready_replicas).unwrap_or(0);
    if ready == 0 {
        let conditions = status
            .and_then(|status| status.conditions.as_deref())
            .unwrap_or(&[]);

        let available = conditions
            .iter()
            .find(|condition| condition.type_ == "Available");
        if available.is_some_and(|condition| condition.status == "False") {
            return DeploymentHealth::Error;
        }

        let progressing = conditions
            .iter()
            .find(|condition| condition.type_ == "Progressing");
        if progressing.is_some_and(|condition| condition.status == "True") {
            return DeploymentHealth::Pending;
        }

        // No informative condition with zero ready replicas reads as failure.
        return DeploymentHealth::Error;
    }

    if ready >= desired {
        return DeploymentHealth::Running;
    }

    DeploymentHealth::Pending
}

fn correlate_ingresses(items: Vec<Ingress>) -> BTreeMap<String, Vec<String>> {
    let mut urls = BTreeMap::<String, Vec<String>>::new();

    for ingress in items {
        let release = ingress
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get("release").cloned())
            .or_else(|| ingress.metadata.name.clone());
        let Some(release) = release else {
            continue;
        };

        let Some(spec) = ingress.spec else {
            continue;
        };
        let has_tls = spec.tls.as_ref().is_some_and(|tls| !tls.is_empty());
        let scheme = if has_tls { "https" } else { "http" };

        for rule in spec.rules.into_iter().flatten() {
            let Some(host) = rule.host.filter(|host| !host.is_empty()) else {
                continue;
            };
            let url = format!("{scheme}://{host}");
            let entry = urls.entry(release.clone()).or_default();
            if !entry.contains(&url) {
                entry.push(url);
            }
        }
    }

    urls
}

fn resolve_urls(item: &KubeDeployment, urls: &BTreeMap<String, Vec<String>>) -> Vec<String> {
    let name = item.metadata.name.as_deref().unwrap_or_default();
    let release = item
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get("release").map(String::as_str))
        .unwrap_or(name);

    urls.get(release)
        .or_else(|| urls.get(name))
        .cloned()
        .unwrap_or_default()
}

fn map_deployment(item: KubeDeployment, urls: Vec<String>) -> Deployment {
    let desired = item.spec.as_ref().and_then(|spec| spec.replicas).unwrap_or(0);
    let status = classify_health(desired, item.status.as_ref());
    let replicas = ReplicaInfo {
        desired,
        ready: item
            .status
            .as_ref()
            .and_then(|status| status.ready_replicas)
            .unwrap_or(0),
        available: item
            .status
            .as_ref()
            .and_then(|status| status.available_replicas)
            .unwrap_or(0),
        unavailable: item
            .status
            .as_ref()
            .and_then(|status| status.unavailable_replicas)
            .unwrap_or(0),
    };
    let created_at = item
        .metadata
        .creation_timestamp
        .as_ref()
        .map(|time| time.0.to_string())
        .unwrap_or_else(|| Utc::now().to_rfc3339());

    Deployment {
        name: item
            .metadata
            .name
            .unwrap_or_else(|| "unknown".to_string()),
        namespace: item
            .metadata
            .namespace
            .unwrap_or_else(|| "unknown".to_string()),
        status,
        replicas,
        labels: item.metadata.labels.unwrap_or_default(),
        created_at,
        urls,
    }
}

fn container_specs(item: &KubeDeployment) -> Vec<ContainerSpec> {
    let Some(containers) = item
        .spec
        .as_ref()
        .and_then(|spec| spec.template.spec.as_ref())
        .map(|pod_spec| &pod_spec.containers)
    else {
        return Vec::new();
    };

    containers
        .iter()
        .map(|container| {
            let (image, image_tag) = split_image(container.image.as_deref().unwrap_or_default());
            let resources = container.resources.as_ref();
            ContainerSpec {
                name: container.name.clone(),
                image,
                image_tag,
                resources: ContainerResources {
                    limits: ResourceQuantities {
                        cpu: quantity(resources.and_then(|r| r.limits.as_ref()), "cpu"),
                        memory: quantity(resources.and_then(|r| r.limits.as_ref()), "memory"),
                    },
                    requests: ResourceQuantities {
                        cpu: quantity(resources.and_then(|r| r.requests.as_ref()), "cpu"),
                        memory: quantity(resources.and_then(|r| r.requests.as_ref()), "memory"),
                    },
                },
            }
        })
        .collect()
}

fn pod_info(pod: &Pod) -> PodInfo {
    let phase = pod
        .status
        .as_ref()
        .and_then(|status| status.phase.clone())
        .unwrap_or_else(|| "Unknown".to_string());
    let statuses = pod
        .status
        .as_ref()
        .and_then(|status| status.container_statuses.as_deref())
        .unwrap_or(&[]);

    PodInfo {
        name: pod.name_any(),
        phase,
        restart_count: statuses.iter().map(|status| status.restart_count).sum(),
        age: human_age(pod.metadata.creation_timestamp.as_ref()),
        container_statuses: statuses
            .iter()
            .map(|status| ContainerStatusInfo {
                name: status.name.clone(),
                ready: status.ready,
                restart_count: status.restart_count,
                state: container_state(status),
            })
            .collect(),
    }
}

fn container_state(status: &ContainerStatus) -> String {
    let Some(state) = status.state.as_ref() else {
        return "unknown".to_string();
    };

    if state.running.is_some() {
        "running"
    } else if state.waiting.is_some() {
        "waiting"
    } else if state.terminated.is_some() {
        "terminated"
    } else {
        "unknown"
    }
    .to_string()
}

/// Splits an image reference on its last colon so registry ports survive,
/// e.g. `host:5000/repo:v2` → (`host:5000/repo`, `v2`).
fn split_image(image: &str) -> (String, String) {
    match image.rsplit_once(':') {
        Some((name, tag)) => (name.to_string(), tag.to_string()),
        None => (image.to_string(), "latest".to_string()),
    }
}

fn quantity(map: Option<&BTreeMap<String, Quantity>>, key: &str) -> Option<String> {
    map.and_then(|quantities| quantities.get(key))
        .map(|quantity| quantity.0.clone())
}

fn selector_query(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn list_params() -> ListParams {
    ListParams::default().limit(500)
}

fn api_error(error: kube::Error, kind: &'static str, namespace: &str, name: &str) -> Error {
    match error {
        kube::Error::Api(response) if response.code == 404 => {
            Error::not_found(kind, namespace, name)
        }
        other => Error::Upstream(other),
    }
}

fn human_age(timestamp: Option<&Time>) -> String {
    let Some(timestamp) = timestamp else {
        return "-".to_string();
    };

    let elapsed_seconds =
        (k8s_openapi::jiff::Timestamp::now().as_second() - timestamp.0.as_second()).max(0);
    format_elapsed_seconds(elapsed_seconds)
}

fn format_elapsed_seconds(seconds: i64) -> String {
    if seconds >= 86_400 {
        return format!("{}d", seconds / 86_400);
    }

    if seconds >= 3_600 {
        return format!("{}h", seconds / 3_600);
    }

    if seconds >= 60 {
        return format!("{}m", seconds / 60);
    }

    format!("{seconds}s")
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{DeploymentCondition, DeploymentSpec};
    use k8s_openapi::api::core::v1::{
        Container, ContainerState, ContainerStateRunning, ContainerStateWaiting, PodSpec,
        PodStatus, PodTemplateSpec, ResourceRequirements,
    };
    use k8s_openapi::api::networking::v1::{IngressRule, IngressSpec, IngressTLS};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn condition(type_: &str, status: &str) -> DeploymentCondition {
        DeploymentCondition {
            type_: type_.to_string(),
            status: status.to_string(),
            ..DeploymentCondition::default()
        }
    }

    fn deployment_status(
        ready: Option<i32>,
        conditions: Vec<DeploymentCondition>,
    ) -> KubeDeploymentStatus {
        KubeDeploymentStatus {
            ready_replicas: ready,
            conditions: Some(conditions),
            ..KubeDeploymentStatus::default()
        }
    }

    #[test]
    fn zero_desired_replicas_is_scaled_to_zero() {
        let stale = deployment_status(Some(3), vec![condition("Available", "False")]);
        assert_eq!(
            classify_health(0, Some(&stale)),
            DeploymentHealth::ScaledToZero
        );
        assert_eq!(classify_health(0, None), DeploymentHealth::ScaledToZero);
    }

    #[test]
    fn zero_ready_replicas_follows_conditions() {
        let unavailable = deployment_status(Some(0), vec![condition("Available", "False")]);
        assert_eq!(classify_health(2, Some(&unavailable)), DeploymentHealth::Error);

        let progressing = deployment_status(None, vec![condition("Progressing", "True")]);
        assert_eq!(
            classify_health(2, Some(&progressing)),
            DeploymentHealth::Pending
        );

        let uninformative = deployment_status(Some(0), Vec::new());
        assert_eq!(
            classify_health(2, Some(&uninformative)),
            DeploymentHealth::Error
        );
        assert_eq!(classify_health(2, None), DeploymentHealth::Error);
    }

    #[test]
    fn ready_replicas_decide_running_versus_pending() {
        let partial = deployment_status(Some(1), Vec::new());
        assert_eq!(classify_health(3, Some(&partial)), DeploymentHealth::Pending);

        let full = deployment_status(Some(3), Vec::new());
        assert_eq!(classify_health(3, Some(&full)), DeploymentHealth::Running);

        let over = deployment_status(Some(4), Vec::new());
        assert_eq!(classify_health(3, Some(&over)), DeploymentHealth::Running);
    }

    #[test]
    fn image_split_uses_last_colon() {
        assert_eq!(
            split_image("img"),
            ("img".to_string(), "latest".to_string())
        );
        assert_eq!(
            split_image("repo:v1"),
            ("repo".to_string(), "v1".to_string())
        );
        assert_eq!(
            split_image("host:5000/repo:v2"),
            ("host:5000/repo".to_string(), "v2".to_string())
        );
    }

    #[test]
    fn selector_query_joins_in_map_order() {
        let mut selector = BTreeMap::new();
        selector.insert("app".to_string(), "web".to_string());
        selector.insert("tier".to_string(), "frontend".to_string());
        assert_eq!(selector_query(&selector), "app=web,tier=frontend");
    }

    #[test]
    fn elapsed_seconds_use_the_largest_whole_unit() {
        assert_eq!(format_elapsed_seconds(45), "45s");
        assert_eq!(format_elapsed_seconds(120), "2m");
        assert_eq!(format_elapsed_seconds(90 * 60), "1h");
        assert_eq!(format_elapsed_seconds(3 * 86_400 + 7_200), "3d");
    }

    fn ingress(
        name: &str,
        release: Option<&str>,
        host: Option<&str>,
        tls: bool,
    ) -> Ingress {
        let labels = release.map(|release| {
            let mut labels = BTreeMap::new();
            labels.insert("release".to_string(), release.to_string());
            labels
        });
        Ingress {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels,
                ..ObjectMeta::default()
            },
            spec: Some(IngressSpec {
                rules: host.map(|host| {
                    vec![IngressRule {
                        host: Some(host.to_string()),
                        ..IngressRule::default()
                    }]
                }),
                tls: tls.then(|| vec![IngressTLS::default()]),
                ..IngressSpec::default()
            }),
            status: None,
        }
    }

    #[test]
    fn duplicate_hosts_for_one_release_are_suppressed() {
        let urls = correlate_ingresses(vec![
            ingress("a", Some("app"), Some("a.example.com"), true),
            ingress("b", Some("app"), Some("a.example.com"), false),
        ]);
        assert_eq!(
            urls.get("app"),
            Some(&vec!["https://a.example.com".to_string()])
        );
    }

    #[test]
    fn release_key_falls_back_to_ingress_name() {
        let urls = correlate_ingresses(vec![ingress("solo", None, Some("solo.example.com"), false)]);
        assert_eq!(
            urls.get("solo"),
            Some(&vec!["http://solo.example.com".to_string()])
        );
    }

    #[test]
    fn hostless_ingresses_contribute_nothing() {
        let urls = correlate_ingresses(vec![ingress("empty", Some("app"), None, true)]);
        assert!(urls.is_empty());
    }

    #[test]
    fn url_lookup_prefers_release_label_then_name() {
        let mut urls = BTreeMap::new();
        urls.insert("app".to_string(), vec!["https://a".to_string()]);
        urls.insert("web".to_string(), vec!["http://b".to_string()]);

        let mut labeled = KubeDeployment::default();
        labeled.metadata.name = Some("web".to_string());
        labeled.metadata.labels = Some(BTreeMap::from([(
            "release".to_string(),
            "app".to_string(),
        )]));
        assert_eq!(resolve_urls(&labeled, &urls), vec!["https://a".to_string()]);

        let mut unlabeled = KubeDeployment::default();
        unlabeled.metadata.name = Some("web".to_string());
        assert_eq!(resolve_urls(&unlabeled, &urls), vec!["http://b".to_string()]);

        let mut stranger = KubeDeployment::default();
        stranger.metadata.name = Some("other".to_string());
        assert!(resolve_urls(&stranger, &urls).is_empty());
    }

    #[test]
    fn missing_metadata_maps_to_unknown() {
        let mapped = map_deployment(KubeDeployment::default(), Vec::new());
        assert_eq!(mapped.name, "unknown");
        assert_eq!(mapped.namespace, "unknown");
        assert!(mapped.labels.is_empty());
        assert!(mapped.urls.is_empty());
        assert_eq!(mapped.status, DeploymentHealth::ScaledToZero);
        assert!(!mapped.created_at.is_empty());
    }

    #[test]
    fn container_specs_come_from_the_pod_template() {
        let mut resources = ResourceRequirements::default();
        resources.requests = Some(BTreeMap::from([(
            "cpu".to_string(),
            Quantity("250m".to_string()),
        )]));
        resources.limits = Some(BTreeMap::from([(
            "memory".to_string(),
            Quantity("512Mi".to_string()),
        )]));

        let item = KubeDeployment {
            spec: Some(DeploymentSpec {
                template: PodTemplateSpec {
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "web".to_string(),
                            image: Some("registry:5000/team/web:1.2.3".to_string()),
                            resources: Some(resources),
                            ..Container::default()
                        }],
                        ..PodSpec::default()
                    }),
                    ..PodTemplateSpec::default()
                },
                ..DeploymentSpec::default()
            }),
            ..KubeDeployment::default()
        };

        let specs = container_specs(&item);
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].image, "registry:5000/team/web");
        assert_eq!(specs[0].image_tag, "1.2.3");
        assert_eq!(specs[0].resources.requests.cpu.as_deref(), Some("250m"));
        assert_eq!(specs[0].resources.limits.memory.as_deref(), Some("512Mi"));
        assert!(specs[0].resources.limits.cpu.is_none());
    }

    #[test]
    fn pod_restarts_sum_over_containers() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("web-0".to_string()),
                ..ObjectMeta::default()
            },
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                container_statuses: Some(vec![
                    ContainerStatus {
                        name: "web".to_string(),
                        ready: true,
                        restart_count: 2,
                        state: Some(ContainerState {
                            running: Some(ContainerStateRunning::default()),
                            ..ContainerState::default()
                        }),
                        ..ContainerStatus::default()
                    },
                    ContainerStatus {
                        name: "sidecar".to_string(),
                        ready: false,
                        restart_count: 3,
                        state: Some(ContainerState {
                            waiting: Some(ContainerStateWaiting::default()),
                            ..ContainerState::default()
                        }),
                        ..ContainerStatus::default()
                    },
                ]),
                ..PodStatus::default()
            }),
            ..Pod::default()
        };

        let info = pod_info(&pod);
        assert_eq!(info.name, "web-0");
        assert_eq!(info.restart_count, 5);
        assert_eq!(info.container_statuses.len(), 2);
        assert_eq!(info.container_statuses[0].state, "running");
        assert_eq!(info.container_statuses[1].state, "waiting");
        assert!(!info.container_statuses[1].ready);
    }
}
