//! Built-in lessons and their question pools.

use std::sync::OnceLock;

use crate::models::lesson::{ExternalLink, Lesson, QuizQuestion};

fn link(title: &str, href: &str) -> ExternalLink {
    ExternalLink {
        title: title.to_string(),
        href: href.to_string(),
    }
}

fn question(id: &str, question: &str, options: [&str; 4], correct_index: usize, explanation: Option<&str>) -> QuizQuestion {
    QuizQuestion {
        id: id.to_string(),
        question: question.to_string(),
        options: options.iter().map(|o| o.to_string()).collect(),
        correct_index,
        explanation: explanation.map(str::to_string),
    }
}

fn build() -> Vec<Lesson> {
    vec![
        Lesson {
            id: 1,
            title: "Understanding Market Emotions".into(),
            content: "Learn how fear and greed influence decisions. Identify FOMO and Panic patterns in real trades.".into(),
            links: vec![
                link("Behavioral Finance - Investopedia", "https://www.investopedia.com/terms/b/behavioralfinance.asp"),
                link("FOMO in Investing - Forbes", "https://www.forbes.com/advisor/investing/fomo-investing/"),
            ],
            quiz: vec![
                question(
                    "1a",
                    "What does FOMO stand for?",
                    ["Fear Of Missing Out", "Focus On Market Opportunity", "Flow Of Money Operations", "Fundamental Opportunity Management"],
                    0,
                    Some("FOMO stands for 'Fear Of Missing Out': it causes impulsive trades when seeing others profit."),
                ),
                question(
                    "1b",
                    "Which is a sign of panic selling?",
                    ["Selling during news hype without checking fundamentals", "Rebalancing calmly", "Sticking to stop-loss rules", "Gradually trimming profits"],
                    0,
                    Some("Panic selling happens when investors exit positions emotionally."),
                ),
                question(
                    "1c",
                    "Best immediate action if feeling FOMO on a pick?",
                    ["Reduce size and re-evaluate thesis", "Buy full position immediately", "Ignore price action", "Close all positions"],
                    0,
                    Some("Reducing size and re-checking the thesis helps avoid impulsive mistakes."),
                ),
                question(
                    "1d",
                    "Which habit reduces emotion-driven trades?",
                    ["Using a written trade plan", "Following social media only", "Trading without stop loss", "Chasing every tip"],
                    0,
                    Some("A written plan and clear rules reduces impulsive behavior."),
                ),
                question(
                    "1e",
                    "Panic selling usually occurs when:",
                    ["Markets fall quickly and emotions dominate", "Long-term fundamentals improve", "You rebalance periodically", "Taxes are due"],
                    0,
                    None,
                ),
                question(
                    "1f",
                    "What should you record to fight FOMO?",
                    ["Entry thesis, target, stop", "Only the ticker", "Nothing", "Only screenshots"],
                    0,
                    Some("A short journal entry helps you remember why you traded."),
                ),
            ],
        },
        Lesson {
            id: 2,
            title: "Building a Diversified Portfolio".into(),
            content: "Diversification reduces risk by investing across different sectors and asset classes.".into(),
            links: vec![
                link("Diversification - Vanguard", "https://investor.vanguard.com/investing/asset-allocation"),
                link("Portfolio Diversification - Morningstar", "https://www.morningstar.com/lp/portfolio-diversification"),
            ],
            quiz: vec![
                question(
                    "2a",
                    "Main benefit of diversification?",
                    ["Eliminates all risk", "Reduces company-specific risk", "Guarantees returns", "Avoids taxes"],
                    1,
                    Some("It reduces company-specific risk, not market risk."),
                ),
                question(
                    "2b",
                    "After large drift from targets you should:",
                    ["Rebalance to target allocations", "Ignore it", "Double winners", "Close portfolio"],
                    0,
                    None,
                ),
                question(
                    "2c",
                    "A well diversified portfolio tends to:",
                    ["Reduce volatility", "Increase single-stock risk", "Guarantee outperformance", "Eliminate fees"],
                    0,
                    None,
                ),
                question(
                    "2d",
                    "Which helps diversification?",
                    ["Different sectors and asset classes", "One sector concentration", "Invest only in one stock", "Always use margin"],
                    0,
                    None,
                ),
                question(
                    "2e",
                    "Why hold bonds in portfolio?",
                    ["Lower overall volatility", "Guarantee market beating returns", "Avoid diversification", "Make tax evasion easier"],
                    0,
                    None,
                ),
                question(
                    "2f",
                    "If one sector is >40% you may:",
                    ["Consider trimming to reduce concentration", "Ignore and hold", "Add more to that sector", "Sell everything"],
                    0,
                    None,
                ),
            ],
        },
        Lesson {
            id: 3,
            title: "Interpreting AI Coach Feedback".into(),
            content: "Learn what FOMO, PANIC, and NORMAL labels mean and how to improve your trading discipline.".into(),
            links: vec![
                link("Trading Psychology - Investopedia", "https://www.investopedia.com/articles/trading/09/trading-psychology.asp"),
                link("Trade Journaling - Medium", "https://medium.com/"),
            ],
            quiz: vec![
                question(
                    "3a",
                    "A 'FOMO' trade is usually triggered by:",
                    ["Fundamental analysis", "Peer pressure or hype", "Stop-loss discipline", "Rebalancing"],
                    1,
                    None,
                ),
                question(
                    "3b",
                    "Why keep a trade journal?",
                    ["Track emotions and learn", "Avoid taxes", "Predict markets perfectly", "Time every entry"],
                    0,
                    Some("Journals help reflection and improvement."),
                ),
                question(
                    "3c",
                    "Coach labels (FOMO/PANIC) help you:",
                    ["Understand behavioral bias", "Guarantee profits", "Replace risk management", "Time market exactly"],
                    0,
                    None,
                ),
                question(
                    "3d",
                    "An entry with no thesis is usually:",
                    ["High risk", "Better than research", "Always correct", "Tax efficient"],
                    0,
                    None,
                ),
                question(
                    "3e",
                    "If labelled PANIC on a sell, you should first:",
                    ["Check if stop was hit or fundamentals changed", "Do more panic selling", "Ignore and do nothing", "Buy more without checking"],
                    0,
                    None,
                ),
                question(
                    "3f",
                    "Best way to reduce repeat mistakes?",
                    ["Review journal and set rules", "Trade without plan", "Follow tips blindly", "Never review trades"],
                    0,
                    None,
                ),
            ],
        },
    ]
}

/// All lessons, in display order.
pub fn lessons() -> &'static [Lesson] {
    static CATALOG: OnceLock<Vec<Lesson>> = OnceLock::new();
    CATALOG.get_or_init(build)
}

pub fn lesson(id: u32) -> Option<&'static Lesson> {
    lessons().iter().find(|l| l.id == id)
}
