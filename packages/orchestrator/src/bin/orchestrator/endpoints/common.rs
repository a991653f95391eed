pub(crate) async fn homepage() -> &'static str {
    r#"LiquiDOT orchestrator.

Read-only surface: /healthz, /build-version, /status, /diagnostics,
/manifest. Nothing here mutates anything."#
}

pub(crate) async fn healthz() -> &'static str {
    "Yup, I'm alive"
}

pub(crate) async fn build_version() -> &'static str {
    liquidot_orchestrator::build_version()
}
