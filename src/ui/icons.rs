pub struct Icons;

impl Icons {
    pub const ROCKET: &str = "🚀";
    pub const CHECK: &str = "✅";
    pub const CROSS: &str = "❌";
    pub const WARN: &str = "⚠️";
    pub const INFO: &str = "ℹ️";
    pub const DATABASE: &str = "🗄️";
    pub const TABLE: &str = "📋";
    pub const PERSON: &str = "👤";
    pub const SQL: &str = "🔎";
    pub const STATS: &str = "📊";
}
