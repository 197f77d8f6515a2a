pub struct DefaultsConfig {
    pub nstruct: usize,
    pub cluster: bool,
    pub cluster_cutoff: f64,
    pub alignment: String,
    pub timeout_secs: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            nstruct: 1,
            cluster: true,
            cluster_cutoff: 5.0,
            alignment: "positional".to_string(),
            timeout_secs: 86_400,
        }
    }
}
