//! The four crew roles and the tools each one gets.

use std::sync::Arc;

use anyhow::Result;

use agentcrew::tools::Toolkit;
use agentcrew::{
    CodeToolkit, CompletionService, DelegationToolkit, DocumentToolkit, GenerationOptions,
    MemoryStore, MemoryToolkit, ResultCache, Role, SearchToolkit,
};

use crate::config::Temperatures;

const MANAGER_PROFILE: &str = "You are a skilled project manager who coordinates a team of AI agents.
Your job is to:
1. Break down complex tasks into manageable steps
2. Assign tasks to the appropriate specialists
3. Review their work and provide feedback
4. Ensure the final deliverable meets the requirements
5. Request human input when necessary

You make clear, decisive plans and communicate expectations clearly.";

const RESEARCHER_PROFILE: &str = "You are an expert researcher who excels at finding and
verifying information. You're thorough, methodical, and detail-oriented.

When conducting research:
1. Break the research question into key components
2. Search for information from multiple sources
3. Verify facts by cross-referencing sources
4. Organize findings in a clear, structured format
5. Include citations for all information
6. Highlight any areas where information is uncertain or conflicting";

const ANALYST_PROFILE: &str = "You are an expert data analyst who excels at processing
information and extracting meaningful insights.

When analyzing information:
1. Organize and structure the data logically
2. Identify key patterns, trends, and relationships
3. Draw evidence-based conclusions
4. Provide clear, actionable insights
5. Highlight limitations and uncertainties in your analysis";

const DEVELOPER_PROFILE: &str = "You are an expert software developer who excels at
translating requirements into high-quality code.

When developing code:
1. Understand the requirements thoroughly
2. Plan your implementation approach
3. Write clean, well-documented code
4. Include error handling and edge cases
5. Provide clear usage examples";

/// Shared resources the role tools run against.
pub struct Resources {
    pub llm: Arc<dyn CompletionService>,
    pub memory: Arc<MemoryStore>,
    pub cache: ResultCache,
    /// Base generation options; temperature and profile are set per role.
    pub options: GenerationOptions,
}

pub struct Team {
    pub manager: Arc<Role>,
    pub researcher: Arc<Role>,
    pub analyst: Arc<Role>,
    pub developer: Arc<Role>,
}

impl Team {
    pub fn workers(&self) -> Vec<Arc<Role>> {
        vec![
            self.researcher.clone(),
            self.analyst.clone(),
            self.developer.clone(),
        ]
    }
}

pub fn build_team(res: &Resources, temps: &Temperatures) -> Result<Team> {
    let memory: Arc<dyn Toolkit> = Arc::new(MemoryToolkit::new(res.memory.clone()));
    let document: Arc<dyn Toolkit> = Arc::new(DocumentToolkit);
    let search: Arc<dyn Toolkit> = Arc::new(SearchToolkit::new(res.cache.clone()));
    let code: Arc<dyn Toolkit> = Arc::new(
        CodeToolkit::new(res.llm.clone())
            .with_options(res.options.clone().with_temperature(temps.developer)),
    );

    let profile = |system: &str, temperature: f32| {
        res.options
            .clone()
            .with_system(system)
            .with_temperature(temperature)
    };

    let researcher = Role::builder("Research Specialist", res.llm.clone())
        .goal("Find accurate, comprehensive information on assigned topics")
        .backstory(
            "You're a renowned research specialist with a talent for finding and verifying \
             information quickly. Your research is always thorough, accurate, and well-organized.",
        )
        .options(profile(RESEARCHER_PROFILE, temps.researcher))
        .toolkit(search)
        .toolkit(document.clone())
        .toolkit(memory.clone())
        .build()?;

    let analyst = Role::builder("Data Analyst", res.llm.clone())
        .goal("Process information to extract valuable insights and patterns")
        .backstory(
            "You're a highly skilled analyst with years of experience turning raw information \
             into actionable insights. You see patterns others miss.",
        )
        .options(profile(ANALYST_PROFILE, temps.analyst))
        .toolkit(document)
        .toolkit(memory.clone())
        .build()?;

    let developer = Role::builder("Software Developer", res.llm.clone())
        .goal("Create high-quality, well-documented code based on specifications")
        .backstory(
            "You're a seasoned software developer who writes clean, efficient code that is easy \
             to maintain and extend.",
        )
        .options(profile(DEVELOPER_PROFILE, temps.developer))
        .toolkit(code)
        .toolkit(memory.clone())
        .build()?;

    let (researcher, analyst, developer) =
        (Arc::new(researcher), Arc::new(analyst), Arc::new(developer));

    let delegation: Arc<dyn Toolkit> = Arc::new(DelegationToolkit::new(vec![
        researcher.clone(),
        analyst.clone(),
        developer.clone(),
    ]));
    let manager = Role::builder("Project Manager", res.llm.clone())
        .goal("Coordinate the team to deliver high-quality results efficiently")
        .backstory(
            "You have years of experience managing complex projects and know each team \
             member's strengths.",
        )
        .options(profile(MANAGER_PROFILE, temps.manager))
        .allow_delegation(true)
        .toolkit(memory)
        .toolkit(delegation)
        .build()?;

    Ok(Team {
        manager: Arc::new(manager),
        researcher,
        analyst,
        developer,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use agentcrew::ServiceError;
    use agentcrew::tools::Capability;
    use async_trait::async_trait;

    pub(crate) struct Offline;

    #[async_trait]
    impl CompletionService for Offline {
        async fn complete(&self, _: &str, _: &GenerationOptions) -> Result<String, ServiceError> {
            Err(ServiceError::Unavailable("offline".into()))
        }
    }

    pub(crate) fn make_resources(dir: &tempfile::TempDir) -> Resources {
        Resources {
            llm: Arc::new(Offline),
            memory: Arc::new(MemoryStore::open(dir.path().join("memory.json")).unwrap()),
            cache: ResultCache::open(dir.path().join("cache")).unwrap(),
            options: GenerationOptions::default(),
        }
    }

    pub(crate) fn temps() -> Temperatures {
        Temperatures {
            manager: 0.2,
            researcher: 0.1,
            analyst: 0.1,
            developer: 0.2,
        }
    }

    #[test]
    fn roles_get_their_tool_families() {
        let dir = tempfile::tempdir().unwrap();
        let team = build_team(&make_resources(&dir), &temps()).unwrap();

        assert_eq!(
            team.researcher.capabilities(),
            &[Capability::Search, Capability::Document, Capability::Memory]
        );
        assert_eq!(
            team.analyst.capabilities(),
            &[Capability::Document, Capability::Memory]
        );
        assert_eq!(
            team.developer.capabilities(),
            &[Capability::Code, Capability::Memory]
        );
        assert_eq!(
            team.manager.capabilities(),
            &[Capability::Memory, Capability::Delegation]
        );
        assert!(team.manager.allow_delegation());
        assert!(!team.researcher.allow_delegation());
    }

    #[test]
    fn temperatures_and_profiles_apply() {
        let dir = tempfile::tempdir().unwrap();
        let team = build_team(&make_resources(&dir), &temps()).unwrap();
        assert_eq!(team.developer.options().temperature, 0.2);
        assert_eq!(team.analyst.options().temperature, 0.1);
        assert!(
            team.researcher
                .options()
                .system
                .as_deref()
                .is_some_and(|s| s.starts_with("You are Research Specialist.")
                    && s.contains("Your personal goal is: Find accurate")
                    && s.contains("You are an expert researcher"))
        );
    }
}
