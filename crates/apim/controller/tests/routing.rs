mod common;

use apim_controller::{
    ControllerError, CreateWay, DistributionMethod, DistributionTarget, Distributor,
    MicroGatewayProvisioner, ProvisionRequest, ReleaseData, ReleaseTarget,
};
use apim_types::{DeployTarget, MicroGatewayConfig};
use common::{host, micro_gateway, World};

async fn plan(world: &World, seeded: &common::SeededGateway) -> Vec<DistributionTarget> {
    let target = ReleaseTarget::load(world.repo.as_ref(), seeded.gateway_id, seeded.stage_id)
        .await
        .expect("target should load");
    world.combine().plan(&target).await.expect("plan should work")
}

async fn data(world: &World, seeded: &common::SeededGateway) -> ReleaseData {
    ReleaseData::load(
        world.repo.as_ref(),
        seeded.gateway_id,
        seeded.stage_id,
        Some(seeded.version_id),
    )
    .await
    .expect("release data should load")
}

#[tokio::test]
async fn unassigned_stage_goes_to_default_fleet_without_global_config() {
    let world = World::new().await;
    let demo = world.add_gateway(1, "demo", vec![host("10.0.0.1:8080")]);

    let planned = plan(&world, &demo).await;
    assert_eq!(planned.len(), 1);
    assert_eq!(planned[0].micro_gateway.id, world.shared.id);
    assert_eq!(
        planned[0].method,
        DistributionMethod::DirectWrite {
            include_global_config: false
        }
    );

    let outcome = world
        .combine()
        .distribute(&data(&world, &demo).await, None)
        .await
        .expect("distribute should run");
    assert!(outcome.success, "{}", outcome.message);

    assert_eq!(
        world.keys("/apim/shared/").await,
        vec![
            "/apim/shared/demo/prod/route/11-1000",
            "/apim/shared/demo/prod/service/11-12",
            "/apim/shared/demo/prod/stage/stage-11",
        ]
    );
}

#[tokio::test]
async fn assigned_shared_fleet_receives_global_config() {
    let world = World::new().await;
    let edge = world.add_micro_gateway(micro_gateway("edge", true, true)).await;
    let demo = world.add_gateway(1, "demo", vec![host("10.0.0.1:8080")]);
    world.assign(demo.stage_id, &edge).await;

    let planned = plan(&world, &demo).await;
    assert_eq!(planned[0].micro_gateway.id, edge.id);
    assert_eq!(
        planned[0].method,
        DistributionMethod::DirectWrite {
            include_global_config: true
        }
    );

    world
        .combine()
        .distribute(&data(&world, &demo).await, None)
        .await
        .expect("distribute should run");
    assert!(world
        .keys("/apim/edge/demo/_global/")
        .await
        .contains(&"/apim/edge/demo/_global/gateway_config/gateway-1".to_string()));
    assert!(world.keys("/apim/shared/").await.is_empty());
}

#[tokio::test]
async fn gateway_global_config_leaves_with_the_last_served_stage() {
    let world = World::new().await;
    let edge = world.add_micro_gateway(micro_gateway("edge", true, true)).await;
    let demo = world.add_gateway(1, "demo", vec![host("10.0.0.1:8080")]);
    let staging = world.add_stage(&demo, 13, "staging", vec![host("10.0.0.2:8080")]);
    world.assign(demo.stage_id, &edge).await;
    world.assign(staging, &edge).await;

    for stage_id in [demo.stage_id, staging] {
        let data = ReleaseData::load(
            world.repo.as_ref(),
            demo.gateway_id,
            stage_id,
            Some(demo.version_id),
        )
        .await
        .expect("release data should load");
        world
            .combine()
            .distribute(&data, None)
            .await
            .expect("distribute should run");
    }
    assert!(!world.keys("/apim/edge/demo/_global/").await.is_empty());

    let prod = ReleaseTarget::load(world.repo.as_ref(), demo.gateway_id, demo.stage_id)
        .await
        .expect("target should load");
    let outcome = world
        .combine()
        .revoke(&prod, None)
        .await
        .expect("revoke should run");
    assert!(outcome.success, "{}", outcome.message);
    assert!(world.keys("/apim/edge/demo/prod/").await.is_empty());
    assert!(!world.keys("/apim/edge/demo/staging/").await.is_empty());
    assert!(!world.keys("/apim/edge/demo/_global/").await.is_empty());

    let last = ReleaseTarget::load(world.repo.as_ref(), demo.gateway_id, staging)
        .await
        .expect("target should load");
    world
        .combine()
        .revoke(&last, None)
        .await
        .expect("revoke should run");
    assert!(world.keys("/apim/edge/").await.is_empty());
}

#[tokio::test]
async fn dedicated_managed_fleet_is_package_deployed_without_new_chart() {
    let world = World::new().await;
    let dedicated = world
        .add_micro_gateway(micro_gateway("demo-dedicated", false, true))
        .await;
    let demo = world.add_gateway(1, "demo", vec![host("10.0.0.1:8080")]);
    world.assign(demo.stage_id, &dedicated).await;

    let planned = plan(&world, &demo).await;
    assert_eq!(
        planned[0].method,
        DistributionMethod::PackageDeploy {
            generate_chart: false
        }
    );

    let outcome = world
        .combine()
        .distribute(&data(&world, &demo).await, None)
        .await
        .expect("distribute should run");
    assert!(outcome.success, "{}", outcome.message);

    let requests = world.deploy_tool.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].release_name, "demo-dedicated");
    assert!(world.charts.get("micro-gateway", "1.4.0").is_none());
    assert!(world.store.is_empty().await);
}

#[tokio::test]
async fn provisioned_release_is_the_one_upgraded_on_publish() {
    let world = World::new().await;
    let demo = world.add_gateway(1, "demo", vec![host("10.0.0.1:8080")]);
    let provisioner = MicroGatewayProvisioner::new(
        world.repo.clone(),
        world.deploy_tool.clone(),
        world.charts.clone(),
        "admin",
    );

    let dedicated = provisioner
        .provision(ProvisionRequest {
            gateway_id: demo.gateway_id,
            name: "demo-mg".into(),
            is_shared: false,
            create_way: CreateWay::Deploy,
            config: MicroGatewayConfig {
                key_prefix: "/apim/demo-mg".into(),
                deploy: Some(DeployTarget {
                    cluster_id: "cluster-1".into(),
                    namespace: "apim".into(),
                    release_name: "demo-mg".into(),
                    chart_name: "micro-gateway".into(),
                    chart_version: "1.4.0".into(),
                }),
                http_url: None,
                edition: "3.13".into(),
            },
        })
        .await
        .expect("provision should install");
    world.assign(demo.stage_id, &dedicated).await;

    let outcome = world
        .combine()
        .distribute(&data(&world, &demo).await, Some("p1"))
        .await
        .expect("distribute should run");
    assert!(outcome.success, "{}", outcome.message);

    let requests = world.deploy_tool.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].release_name, "demo-mg");
    assert_eq!(requests[1].release_name, requests[0].release_name);
    assert_eq!(requests[1].namespace, requests[0].namespace);
    assert_eq!(requests[1].values["stages"]["prod"]["enabled"], true);
}

#[tokio::test]
async fn dedicated_unmanaged_fleet_gets_direct_write_in_its_namespace() {
    let world = World::new().await;
    let own = world
        .add_micro_gateway(micro_gateway("demo-own", false, false))
        .await;
    let demo = world.add_gateway(1, "demo", vec![host("10.0.0.1:8080")]);
    world.assign(demo.stage_id, &own).await;

    let planned = plan(&world, &demo).await;
    assert_eq!(
        planned[0].method,
        DistributionMethod::DirectWrite {
            include_global_config: true
        }
    );

    world
        .combine()
        .distribute(&data(&world, &demo).await, None)
        .await
        .expect("distribute should run");
    assert!(!world.keys("/apim/demo-own/demo/prod/").await.is_empty());
    assert!(!world.keys("/apim/demo-own/demo/_global/").await.is_empty());
    assert!(world.deploy_tool.requests().is_empty());
}

#[tokio::test]
async fn missing_default_fleet_is_not_found() {
    let world = World::without_default_fleet().await;
    let demo = world.add_gateway(1, "demo", vec![host("10.0.0.1:8080")]);

    let target = ReleaseTarget::load(world.repo.as_ref(), demo.gateway_id, demo.stage_id)
        .await
        .expect("target should load");
    let result = world.combine().plan(&target).await;
    assert!(matches!(result, Err(ControllerError::NotFound { .. })));
}

#[tokio::test]
async fn failing_branch_does_not_suppress_the_other() {
    let world = World::new().await;
    let dedicated = world
        .add_micro_gateway(micro_gateway("demo-dedicated", false, true))
        .await;
    world
        .deploy_tool
        .reject_release("demo-dedicated", "helm: release locked");
    let demo = world.add_gateway(1, "demo", vec![host("10.0.0.1:8080")]);

    let targets = vec![
        DistributionTarget {
            micro_gateway: dedicated,
            method: DistributionMethod::PackageDeploy {
                generate_chart: false,
            },
        },
        DistributionTarget {
            micro_gateway: world.shared.clone(),
            method: DistributionMethod::DirectWrite {
                include_global_config: false,
            },
        },
    ];

    let outcome = world
        .combine()
        .distribute_to(&targets, &data(&world, &demo).await, Some("p1"))
        .await
        .expect("branches report failure, not errors");

    assert!(!outcome.success);
    assert!(outcome.message.contains("helm: release locked"));
    assert_eq!(world.deploy_tool.requests().len(), 1);
    assert!(!world.keys("/apim/shared/demo/prod/").await.is_empty());
}

#[tokio::test]
async fn erroring_branch_still_lets_later_branches_run() {
    let world = World::new().await;
    let mut broken = micro_gateway("demo-dedicated", false, true);
    broken.config.deploy = None;
    let demo = world.add_gateway(1, "demo", vec![host("10.0.0.1:8080")]);

    let targets = vec![
        DistributionTarget {
            micro_gateway: broken,
            method: DistributionMethod::PackageDeploy {
                generate_chart: false,
            },
        },
        DistributionTarget {
            micro_gateway: world.shared.clone(),
            method: DistributionMethod::DirectWrite {
                include_global_config: false,
            },
        },
    ];

    let result = world
        .combine()
        .distribute_to(&targets, &data(&world, &demo).await, None)
        .await;

    assert!(matches!(result, Err(ControllerError::Validation(_))));
    assert!(!world.keys("/apim/shared/demo/prod/").await.is_empty());
}
