//! The research → analysis → design → implementation pipeline.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use agentcrew::{ApprovalHandler, Crew, MemoryStore, Process, TaskSpec};

use crate::config::Settings;
use crate::roles::Team;

/// `arg` is a path to a project brief, or the brief itself.
pub fn load_project(arg: &str) -> Result<String> {
    let path = Path::new(arg);
    let text = if path.is_file() {
        std::fs::read_to_string(path)
            .with_context(|| format!("can't read project brief {}", path.display()))?
    } else {
        arg.to_string()
    };
    let text = text.trim().to_string();
    anyhow::ensure!(!text.is_empty(), "project description is empty");
    Ok(text)
}

/// The four sequential tasks, each consuming every earlier output.
pub fn rag_tasks(team: &Team, project: &str, human_feedback: bool) -> Vec<TaskSpec> {
    let research = TaskSpec::new(
        team.researcher.clone(),
        &format!(
            "Research the current state of RAG (Retrieval-Augmented Generation) systems.\n\
             Focus on:\n\
             - Core components and architecture\n\
             - Best practices for implementation\n\
             - Latest innovations and techniques\n\
             - Performance benchmarks\n\
             - Real-world applications\n\n\
             Project context: {project}\n\n\
             Use the memory tools to store important facts for later use."
        ),
        "A research report covering RAG architecture and components, implementation best \
         practices, recent innovations, performance benchmarks, real-world applications and \
         citations.",
    )
    .with_id("research");

    let analysis = TaskSpec::new(
        team.analyst.clone(),
        &format!(
            "Analyze the research findings to compare RAG systems with fine-tuning approaches.\n\
             1. Identify key strengths and limitations of RAG systems\n\
             2. Compare RAG with fine-tuning on performance, cost, implementation complexity, \
             maintenance requirements and use case suitability\n\
             3. Develop a decision framework for when to use RAG vs. fine-tuning\n\
             4. Identify hybrid approaches that combine both methods\n\n\
             Project context: {project}\n\n\
             Use the memory tools to retrieve research facts and to store your insights."
        ),
        "An analysis comparing RAG and fine-tuning with strengths, limitations, a decision \
         framework, hybrid approaches and supporting evidence.",
    )
    .with_id("analysis")
    .with_context(&["research"]);

    let design = TaskSpec::new(
        team.developer.clone(),
        &format!(
            "Based on the research and analysis, design a RAG system architecture.\n\
             Include:\n\
             1. High-level architecture with all components\n\
             2. Data flow\n\
             3. Component specifications: document processing, embedding generation, \
             vector storage, retrieval, response generation\n\
             4. Technology stack recommendations\n\
             5. Implementation considerations\n\n\
             Project context: {project}"
        ),
        "A design document with architecture, component specifications, data flow, \
         technology recommendations and implementation guidelines.",
    )
    .with_id("design")
    .with_context(&["research", "analysis"]);

    let implementation = TaskSpec::new(
        team.developer.clone(),
        &format!(
            "Implement a simple but functional RAG system based on the approved design.\n\
             Include code for document processing, embedding generation, vector storage, \
             retrieval and response generation, with documentation, error handling and \
             usage examples.\n\n\
             Project context: {project}\n\n\
             Use the generate_code tool to create well-structured, documented code."
        ),
        "Documented code for every component, integration code, usage examples and notes on \
         limitations.",
    )
    .with_id("implementation")
    .with_context(&["research", "analysis", "design"]);

    [research, analysis, design, implementation]
        .into_iter()
        .map(|t| t.with_approval(human_feedback))
        .collect()
}

pub fn manager_goal(project: &str) -> String {
    format!(
        "Coordinate the implementation of a RAG (Retrieval-Augmented Generation) system \
         based on the following requirements: {project}\n\n\
         Your team needs to:\n\
         1. Research the current state of RAG systems\n\
         2. Analyze the strengths and limitations compared to fine-tuning\n\
         3. Design a RAG system architecture\n\
         4. Implement a simple but functional RAG system"
    )
}

pub fn build_crew(
    team: &Team,
    project: &str,
    settings: &Settings,
    approval: Arc<dyn ApprovalHandler>,
    memory: Arc<MemoryStore>,
) -> Result<Crew> {
    let mut builder = Crew::builder()
        .approval(approval, settings.approval.clone())
        .memory(memory);
    for worker in team.workers() {
        builder = builder.role(worker);
    }

    let builder = match settings.process {
        Process::Sequential => rag_tasks(team, project, settings.human_feedback)
            .into_iter()
            .fold(builder, |b, t| b.task(t)),
        Process::Hierarchical => builder
            .hierarchical(team.manager.clone(), &manager_goal(project))
            .manager_approval(settings.human_feedback),
    };
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::build_team;
    use crate::roles::tests::{make_resources, temps};
    use crate::{Cli, Command};
    use agentcrew::AutoApprove;
    use clap::Parser;

    fn settings(args: &[&str]) -> Settings {
        let cli = Cli::try_parse_from(args).unwrap();
        let run = match &cli.command {
            Command::Run(r) => Some(r),
            _ => None,
        };
        Settings::merge(&cli, run, &crate::config::Config::default())
    }

    #[test]
    fn tasks_accumulate_context() {
        let dir = tempfile::tempdir().unwrap();
        let team = build_team(&make_resources(&dir), &temps()).unwrap();
        let tasks = rag_tasks(&team, "docs bot", true);

        let ids: Vec<_> = tasks.iter().map(|t| t.id.clone().unwrap()).collect();
        assert_eq!(ids, vec!["research", "analysis", "design", "implementation"]);
        assert_eq!(tasks[3].context, vec!["research", "analysis", "design"]);
        assert!(tasks.iter().all(|t| t.human_approval));
        assert!(tasks[0].description.contains("Project context: docs bot"));
        assert_eq!(tasks[2].role.name(), "Software Developer");
    }

    #[test]
    fn sequential_crew_runs_four_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let res = make_resources(&dir);
        let team = build_team(&res, &temps()).unwrap();
        let s = settings(&["agentcrew", "run", "--project", "x"]);
        let crew = build_crew(&team, "x", &s, Arc::new(AutoApprove), res.memory.clone()).unwrap();
        assert_eq!(crew.process(), Process::Sequential);
        assert_eq!(
            crew.execution_order(),
            ["research", "analysis", "design", "implementation"]
        );
    }

    #[test]
    fn hierarchical_crew_runs_manager_only() {
        let dir = tempfile::tempdir().unwrap();
        let res = make_resources(&dir);
        let team = build_team(&res, &temps()).unwrap();
        let s = settings(&["agentcrew", "run", "--project", "x", "--process", "hierarchical"]);
        let crew = build_crew(&team, "x", &s, Arc::new(AutoApprove), res.memory.clone()).unwrap();
        assert_eq!(crew.execution_order(), ["manager-delegation"]);
        let task = crew.graph().get("manager-delegation").unwrap();
        assert!(task.description().contains("- Research Specialist:"));
        assert!(task.description().contains("- Software Developer:"));
    }

    #[test]
    fn hierarchical_human_feedback_reviews_the_manager() {
        let dir = tempfile::tempdir().unwrap();
        let res = make_resources(&dir);
        let team = build_team(&res, &temps()).unwrap();
        let args = ["agentcrew", "run", "--project", "x", "--process", "hierarchical"];

        let s = settings(&args);
        let crew = build_crew(&team, "x", &s, Arc::new(AutoApprove), res.memory.clone()).unwrap();
        assert!(!crew.graph().get("manager-delegation").unwrap().human_approval());

        let mut with_feedback = args.to_vec();
        with_feedback.push("--human-feedback");
        let s = settings(&with_feedback);
        let crew = build_crew(&team, "x", &s, Arc::new(AutoApprove), res.memory.clone()).unwrap();
        assert!(crew.graph().get("manager-delegation").unwrap().human_approval());
    }

    #[test]
    fn project_brief_from_file_or_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brief.txt");
        std::fs::write(&path, "  Index the API docs \n").unwrap();
        assert_eq!(load_project(path.to_str().unwrap()).unwrap(), "Index the API docs");
        assert_eq!(load_project("inline brief").unwrap(), "inline brief");
        assert!(load_project("   ").is_err());
    }
}
