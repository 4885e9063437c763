pub mod tests {
    use super::super::{
        ActualLrp,
        ActualLrpInstanceKey,
        ActualLrpKey,
        ActualLrpNetInfo,
        ActualLrpState,
        CellPresence,
        DesiredLrp,
        DesiredLrpBuilder,
        PortMapping,
        Resource,
        RunAction,
        Task,
        TaskBuilder,
        TaskDefinitionBuilder,
    };

    pub const TEST_DOMAIN: &str = "test-domain";
    pub const TEST_PROCESS_GUID: &str = "process-guid";
    pub const TEST_CELL_ID: &str = "cell-1";
    pub const TEST_ROOT_FS: &str = "preloaded:cflinuxfs4";

    /// Nanosecond timestamp used as `since` for records created outside a
    /// store.
    pub const TEST_SINCE: u64 = 1_000;

    pub fn test_run_action() -> RunAction {
        RunAction {
            path: "/bin/server".to_string(),
            args: vec!["--port".to_string(), "8080".to_string()],
            user: "vcap".to_string(),
            dir: None,
        }
    }

    pub fn mock_desired_lrp(process_guid: &str, instances: u32) -> DesiredLrp {
        mock_desired_lrp_in_domain(process_guid, TEST_DOMAIN, instances)
    }

    pub fn mock_desired_lrp_in_domain(process_guid: &str, domain: &str, instances: u32) -> DesiredLrp {
        DesiredLrpBuilder::default()
            .process_guid(process_guid)
            .domain(domain)
            .log_guid(format!("log-{process_guid}"))
            .instances(instances)
            .root_fs(TEST_ROOT_FS)
            .resource(Resource {
                memory_mb: 256,
                disk_mb: 1024,
                max_pids: 0,
            })
            .ports(vec![8080])
            .action(test_run_action())
            .created_at(TEST_SINCE)
            .build()
            .unwrap()
    }

    pub fn mock_instance_key(instance_guid: &str, cell_id: &str) -> ActualLrpInstanceKey {
        ActualLrpInstanceKey::new(instance_guid, cell_id)
    }

    pub fn mock_net_info() -> ActualLrpNetInfo {
        ActualLrpNetInfo::new(
            "10.0.0.1",
            vec![PortMapping {
                container_port: 8080,
                host_port: 61000,
            }],
        )
    }

    pub fn mock_unclaimed_actual_lrp(process_guid: &str, index: u32) -> ActualLrp {
        ActualLrp::new_unclaimed(ActualLrpKey::new(process_guid, index, TEST_DOMAIN), TEST_SINCE)
    }

    pub fn mock_actual_lrp(
        process_guid: &str,
        index: u32,
        state: ActualLrpState,
        cell_id: &str,
    ) -> ActualLrp {
        let mut lrp = mock_unclaimed_actual_lrp(process_guid, index);
        lrp.state = state;
        match state {
            ActualLrpState::Claimed => {
                lrp.instance_key = mock_instance_key(&format!("ig-{process_guid}-{index}"), cell_id);
            }
            ActualLrpState::Running => {
                lrp.instance_key = mock_instance_key(&format!("ig-{process_guid}-{index}"), cell_id);
                lrp.net_info = mock_net_info();
            }
            ActualLrpState::Unclaimed | ActualLrpState::Crashed => {}
        }
        lrp
    }

    pub fn mock_cell(cell_id: &str) -> CellPresence {
        CellPresence::new(cell_id, format!("http://{cell_id}.cells.internal:1800"))
    }

    pub fn mock_task(task_guid: &str) -> Task {
        TaskBuilder::default()
            .task_guid(task_guid)
            .domain(TEST_DOMAIN)
            .definition(
                TaskDefinitionBuilder::default()
                    .root_fs(TEST_ROOT_FS)
                    .action(test_run_action())
                    .result_file("/tmp/result")
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap()
    }
}
