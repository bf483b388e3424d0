use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use trail_agent::TabAgent;
use trail_coordinator::{Coordinator, SettingsSurface};
use trail_core::{marker, DisplayMode, TabId};
use trail_host::{MessageFabric, SimHost, TabHost};
use trail_store::{MemoryStore, SqliteStore, StorePair};

struct Rig {
    host: SimHost,
    fabric: MessageFabric,
    stores: StorePair,
}

impl Rig {
    fn new(mode: usize) -> Self {
        Self::over_stores(mode, StorePair::in_memory())
    }

    fn over_stores(mode: usize, stores: StorePair) -> Self {
        stores
            .synced
            .save_display_mode(DisplayMode::new(mode))
            .expect("seed mode");
        Self {
            host: SimHost::new(),
            fabric: MessageFabric::new(),
            stores,
        }
    }

    fn coordinator(&self) -> Coordinator {
        Coordinator::new(
            Arc::new(self.host.clone()),
            self.fabric.clone(),
            self.stores.clone(),
        )
    }

    fn settings(&self) -> SettingsSurface {
        SettingsSurface::new(
            Arc::new(self.host.clone()),
            self.fabric.clone(),
            self.stores.clone(),
        )
    }

    async fn attach_agent(&self, tab: TabId) -> trail_agent::AgentHandle {
        let doc = Box::new(self.host.document(tab).expect("document"));
        TabAgent::spawn(tab, doc, self.fabric.clone(), self.stores.synced.clone()).await
    }

    async fn settle_title(&self, tab: TabId, expected: &str) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let title = self.host.title(tab).expect("title");
            if title == expected {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "tab {tab} stuck at {title:?}, wanted {expected:?}"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn settle_stack(&self, expected: &[TabId]) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let probe = self
                .host
                .all_tabs()
                .first()
                .map(|snapshot| snapshot.id)
                .unwrap_or(TabId(0));
            let reply = self.fabric.query_position(probe).await.expect("query");
            if reply.stack_snapshot == expected {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "stack stuck at {:?}, wanted {expected:?}",
                reply.stack_snapshot
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

fn marked(title: &str, position: usize) -> String {
    marker::apply(title, position).expect("in-range position")
}

#[tokio::test]
async fn activation_stream_marks_titles_through_live_agents() {
    let rig = Rig::new(4);
    let window = rig.host.open_window();
    let alpha = rig
        .host
        .open_tab(window, "https://alpha.example", "Alpha")
        .expect("open tab");
    let beta = rig
        .host
        .open_tab(window, "https://beta.example", "Beta")
        .expect("open tab");
    let gamma = rig
        .host
        .open_tab(window, "https://gamma.example", "Gamma")
        .expect("open tab");

    let _alpha_agent = rig.attach_agent(alpha).await;
    let _beta_agent = rig.attach_agent(beta).await;
    // No agent for gamma: its deliveries fail and are swallowed.

    let coordinator = rig.coordinator().spawn().await;

    rig.host.activate(alpha).expect("activate");
    rig.host.activate(beta).expect("activate");

    rig.settle_stack(&[beta, alpha, gamma]).await;
    rig.settle_title(beta, &marked("Beta", 1)).await;
    rig.settle_title(alpha, &marked("Alpha", 2)).await;
    assert_eq!(rig.host.title(gamma).expect("title"), "Gamma");

    coordinator.stop().await;
}

#[tokio::test]
async fn closing_the_active_tab_promotes_its_successor() {
    let rig = Rig::new(4);
    let window = rig.host.open_window();
    let alpha = rig
        .host
        .open_tab(window, "https://alpha.example", "Alpha")
        .expect("open tab");
    let beta = rig
        .host
        .open_tab(window, "https://beta.example", "Beta")
        .expect("open tab");
    let gamma = rig
        .host
        .open_tab(window, "https://gamma.example", "Gamma")
        .expect("open tab");

    let _alpha_agent = rig.attach_agent(alpha).await;
    let beta_agent = rig.attach_agent(beta).await;
    let _gamma_agent = rig.attach_agent(gamma).await;

    let coordinator = rig.coordinator().spawn().await;
    rig.host.activate(gamma).expect("activate");
    rig.host.activate(alpha).expect("activate");
    rig.host.activate(beta).expect("activate");
    rig.settle_stack(&[beta, alpha, gamma]).await;

    // Closing the active tab also activates its youngest sibling.
    rig.host.close(beta).expect("close");
    rig.settle_stack(&[gamma, alpha]).await;
    rig.settle_title(gamma, &marked("Gamma", 1)).await;
    rig.settle_title(alpha, &marked("Alpha", 2)).await;

    beta_agent.join().await;
    coordinator.stop().await;
}

#[tokio::test]
async fn mode_shrink_from_the_settings_surface_clears_trailing_markers() {
    let rig = Rig::new(4);
    let window = rig.host.open_window();
    let alpha = rig
        .host
        .open_tab(window, "https://alpha.example", "Alpha")
        .expect("open tab");
    let beta = rig
        .host
        .open_tab(window, "https://beta.example", "Beta")
        .expect("open tab");
    let gamma = rig
        .host
        .open_tab(window, "https://gamma.example", "Gamma")
        .expect("open tab");

    let _alpha_agent = rig.attach_agent(alpha).await;
    let _beta_agent = rig.attach_agent(beta).await;
    let _gamma_agent = rig.attach_agent(gamma).await;

    let coordinator = rig.coordinator().spawn().await;
    rig.host.activate(alpha).expect("activate");
    rig.host.activate(beta).expect("activate");
    rig.host.activate(gamma).expect("activate");
    rig.settle_stack(&[gamma, beta, alpha]).await;
    rig.settle_title(alpha, &marked("Alpha", 3)).await;

    let applied = rig.settings().set_display_mode(1).await.expect("set mode");
    assert_eq!(applied, DisplayMode::SINGLE);

    rig.settle_stack(&[gamma]).await;
    rig.settle_title(gamma, &marked("Gamma", 1)).await;
    rig.settle_title(beta, "Beta").await;
    rig.settle_title(alpha, "Alpha").await;

    coordinator.stop().await;
}

#[tokio::test]
async fn coordinator_restart_adopts_the_persisted_stack() {
    let dir = TempDir::new().expect("temp dir");
    let local = SqliteStore::open(dir.path().join("trail.db")).expect("open store");
    let stores = StorePair::new(Arc::new(local), Arc::new(MemoryStore::new()));
    let rig = Rig::over_stores(4, stores);

    let window = rig.host.open_window();
    let first = rig
        .host
        .open_tab(window, "https://first.example", "First")
        .expect("open tab");
    let second = rig
        .host
        .open_tab(window, "https://second.example", "Second")
        .expect("open tab");

    let _first_agent = rig.attach_agent(first).await;
    let _second_agent = rig.attach_agent(second).await;

    let coordinator = rig.coordinator().spawn().await;
    rig.host.activate(first).expect("activate");
    rig.host.activate(second).expect("activate");
    rig.settle_stack(&[second, first]).await;
    rig.settle_title(second, &marked("Second", 1)).await;
    rig.settle_title(first, &marked("First", 2)).await;
    coordinator.stop().await;

    assert_eq!(rig.stores.local.load_stack(), vec![second, first]);

    // A fresh coordinator over the same stores adopts the survivors.
    let restarted = rig.coordinator().spawn().await;
    rig.settle_stack(&[second, first]).await;
    rig.settle_title(second, &marked("Second", 1)).await;
    rig.settle_title(first, &marked("First", 2)).await;

    rig.host.activate(first).expect("activate");
    rig.settle_stack(&[first, second]).await;
    rig.settle_title(first, &marked("First", 1)).await;
    rig.settle_title(second, &marked("Second", 2)).await;

    restarted.stop().await;
}

#[tokio::test]
async fn late_agent_converges_through_its_own_query() {
    let rig = Rig::new(4);
    let window = rig.host.open_window();
    let solo = rig
        .host
        .open_tab(window, "https://solo.example", "Solo")
        .expect("open tab");

    let coordinator = rig.coordinator().spawn().await;
    rig.settle_stack(&[solo]).await;
    assert_eq!(rig.host.title(solo).expect("title"), "Solo");

    // The agent arrives after the broadcast already missed it; its own
    // startup query closes the gap.
    let _agent = rig.attach_agent(solo).await;
    rig.settle_title(solo, &marked("Solo", 1)).await;

    coordinator.stop().await;
}

#[tokio::test]
async fn runtime_teardown_restores_every_title() {
    let rig = Rig::new(4);
    let window = rig.host.open_window();
    let alpha = rig
        .host
        .open_tab(window, "https://alpha.example", "Alpha")
        .expect("open tab");
    let beta = rig
        .host
        .open_tab(window, "https://beta.example", "Beta")
        .expect("open tab");

    let alpha_agent = rig.attach_agent(alpha).await;
    let beta_agent = rig.attach_agent(beta).await;

    let coordinator = rig.coordinator().spawn().await;
    rig.host.activate(alpha).expect("activate");
    rig.host.activate(beta).expect("activate");
    rig.settle_stack(&[beta, alpha]).await;
    rig.settle_title(beta, &marked("Beta", 1)).await;
    rig.settle_title(alpha, &marked("Alpha", 2)).await;

    rig.fabric.invalidate().await;

    rig.settle_title(beta, "Beta").await;
    rig.settle_title(alpha, "Alpha").await;
    alpha_agent.join().await;
    beta_agent.join().await;

    coordinator.stop().await;
}
