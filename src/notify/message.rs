use anyhow::{Context, Result};
use url::Url;

use super::MailMessage;
use crate::bolao::dezena;
use crate::bolao::matcher::PoolSummary;
use crate::db::models::{Draw, Pool, Subscriber};

/// Builds the public links included in emails
#[derive(Debug, Clone)]
pub struct Links {
    base: Url,
}

impl Links {
    pub fn new(public_base_url: &str) -> Result<Self> {
        let mut base = public_base_url.trim_end_matches('/').to_string();
        base.push('/');
        let base = Url::parse(&base)
            .with_context(|| format!("Invalid public base URL '{}'", public_base_url))?;
        Ok(Links { base })
    }

    pub fn pool(&self, pool_id: &str) -> Result<Url> {
        Ok(self.base.join(&format!("pools/{}", pool_id))?)
    }

    pub fn verify(&self, token: &str) -> Result<Url> {
        let mut url = self.base.join("verify")?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }
}

fn pool_title(pool: &Pool) -> &str {
    pool.name.as_deref().unwrap_or(&pool.id)
}

/// Result announcement for a resolved pool
pub fn draw_result(
    summary: &PoolSummary,
    draw: &Draw,
    to: &str,
    links: &Links,
) -> Result<MailMessage> {
    let title = pool_title(&summary.pool);
    let link = links.pool(&summary.pool.id)?;
    let drawn = dezena::display(&draw.numbers);

    let subject = match summary.achievement {
        Some(a) => format!(
            "Bolão {}: {}! Concurso {}",
            title,
            a.as_str().to_uppercase(),
            draw.number
        ),
        None => format!("Bolão {}: resultado do concurso {}", title, draw.number),
    };

    let best = match summary.max_hits {
        Some(hits) => match summary.achievement {
            Some(a) => format!("Melhor jogo: {} acertos ({})", hits, a),
            None => format!("Melhor jogo: {} acertos", hits),
        },
        None => "Nenhum jogo registrado".to_string(),
    };
    let notable = format!(
        "Jogos com 4 ou mais acertos: {} de {}",
        summary.games_with_at_least(4),
        summary.games.len()
    );

    let text = format!(
        "Resultado do concurso {} ({}): {}\n{}\n{}\nVeja o bolão: {}\n",
        draw.number, draw.date, drawn, best, notable, link
    );

    let mut rows = String::new();
    for ranked in &summary.games {
        let cells = ranked
            .game
            .numbers
            .iter()
            .map(|d| {
                if ranked.is_hit(d, draw) {
                    format!("<b>{}</b>", d)
                } else {
                    d.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td></tr>",
            cells,
            ranked.hits.unwrap_or(0)
        ));
    }
    let html = format!(
        "<p>Resultado do concurso {} ({}): <b>{}</b></p>\
         <p>{}<br>{}</p>\
         <table><tr><th>Jogo</th><th>Acertos</th></tr>{}</table>\
         <p><a href=\"{}\">{}</a></p>",
        draw.number,
        escape_html(&draw.date),
        drawn,
        escape_html(&best),
        escape_html(&notable),
        rows,
        escape_html(link.as_str()),
        escape_html(title),
    );

    Ok(MailMessage {
        to: to.to_string(),
        subject,
        text,
        html,
    })
}

/// Confirmation request sent after subscribing
pub fn verification(pool: &Pool, subscriber: &Subscriber, links: &Links) -> Result<MailMessage> {
    let token = subscriber
        .verify_token
        .as_deref()
        .context("Subscriber has no pending verification token")?;
    let title = pool_title(pool);
    let link = links.verify(token)?;

    let subject = format!("Confirme sua inscrição no bolão {}", title);
    let text = format!(
        "Para receber o resultado do concurso {} do bolão {}, confirme sua inscrição:\n{}\n\nCódigo: {}\n",
        pool.target_draw, title, link, token
    );
    let html = format!(
        "<p>Para receber o resultado do concurso {} do bolão {}, \
         <a href=\"{}\">confirme sua inscrição</a>.</p><p>Código: <code>{}</code></p>",
        pool.target_draw,
        escape_html(title),
        escape_html(link.as_str()),
        escape_html(token),
    );

    Ok(MailMessage {
        to: subscriber.email.clone(),
        subject,
        text,
        html,
    })
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bolao::dezena::{parse_draw, parse_game};
    use crate::db::models::{Game, PoolDraw, SubscriberStatus};
    use chrono::Utc;

    fn pool(name: Option<&str>) -> Pool {
        Pool {
            id: "abcdef0123".into(),
            name: name.map(str::to_string),
            target_draw: 2700,
            edit_token: "secret".into(),
            created_at: Utc::now(),
        }
    }

    fn draw() -> Draw {
        Draw {
            number: 2700,
            numbers: parse_draw(&["04", "08", "15", "16", "23", "42"]).unwrap(),
            date: "30/03/2024".into(),
            updated_at: Utc::now(),
        }
    }

    fn game(id: i64, values: &[&str]) -> Game {
        Game {
            id,
            pool_id: "abcdef0123".into(),
            numbers: parse_game(values).unwrap(),
            created_at: Utc::now(),
        }
    }

    fn links() -> Links {
        Links::new("https://bolao.example.com/").unwrap()
    }

    #[test]
    fn test_links() {
        let links = links();
        assert_eq!(
            links.pool("abcdef0123").unwrap().as_str(),
            "https://bolao.example.com/pools/abcdef0123"
        );
        assert_eq!(
            links.verify("tok").unwrap().as_str(),
            "https://bolao.example.com/verify?token=tok"
        );
    }

    #[test]
    fn test_draw_result_with_sena() {
        let summary = PoolSummary::build(
            pool(Some("Firma")),
            PoolDraw::Resolved(draw()),
            vec![
                game(1, &["04", "08", "15", "16", "23", "42"]),
                game(2, &["01", "02", "03", "04", "08", "15"]),
            ],
        );
        let msg = draw_result(&summary, &draw(), "ana@example.com", &links()).unwrap();
        assert_eq!(msg.to, "ana@example.com");
        assert_eq!(msg.subject, "Bolão Firma: SENA! Concurso 2700");
        assert!(msg.text.contains("04 08 15 16 23 42"));
        assert!(msg.text.contains("Melhor jogo: 6 acertos (sena)"));
        assert!(msg.text.contains("Jogos com 4 ou mais acertos: 1 de 2"));
        assert!(msg.html.contains("<b>04</b>"));
    }

    #[test]
    fn test_draw_result_without_achievement() {
        let summary = PoolSummary::build(
            pool(None),
            PoolDraw::Resolved(draw()),
            vec![game(1, &["01", "02", "03", "04", "08", "15"])],
        );
        let msg = draw_result(&summary, &draw(), "ana@example.com", &links()).unwrap();
        assert_eq!(msg.subject, "Bolão abcdef0123: resultado do concurso 2700");
        assert!(msg.text.contains("Melhor jogo: 3 acertos\n"));
    }

    #[test]
    fn test_html_escapes_pool_name() {
        let summary = PoolSummary::build(
            pool(Some("<script>")),
            PoolDraw::Resolved(draw()),
            vec![],
        );
        let msg = draw_result(&summary, &draw(), "ana@example.com", &links()).unwrap();
        assert!(!msg.html.contains("<script>"));
        assert!(msg.html.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_verification_message() {
        let subscriber = Subscriber {
            id: 1,
            pool_id: "abcdef0123".into(),
            email: "ana@example.com".into(),
            status: SubscriberStatus::Pending,
            verify_token: Some("tok123".into()),
            last_notified_draw: None,
            subscribed_at: Utc::now(),
            verified_at: None,
        };
        let msg = verification(&pool(Some("Firma")), &subscriber, &links()).unwrap();
        assert_eq!(msg.to, "ana@example.com");
        assert!(msg.text.contains("https://bolao.example.com/verify?token=tok123"));
        assert!(msg.text.contains("concurso 2700"));

        let verified = Subscriber {
            verify_token: None,
            status: SubscriberStatus::Verified,
            ..subscriber
        };
        assert!(verification(&pool(None), &verified, &links()).is_err());
    }
}
