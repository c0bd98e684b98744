//! Few-shot prompts for query understanding and answer generation
//!
//! Every extraction prompt anchors "today" and computes its worked
//! example dates from it, so relative expressions resolve consistently.

use super::Lang;
use chrono::{DateTime, Datelike, Months, NaiveDate, SecondsFormat, Utc};

/// Extraction axis a prompt is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Dates,
    Subject,
    Question,
    Senders,
}

impl Axis {
    pub fn as_str(&self) -> &'static str {
        match self {
            Axis::Dates => "dates",
            Axis::Subject => "subject",
            Axis::Question => "question",
            Axis::Senders => "senders",
        }
    }
}

/// Anchor instants the date examples are written with
struct ExampleDates {
    now: String,
    month_ago: String,
    year_start: String,
    quarter_end: String,
}

impl ExampleDates {
    fn new(now: DateTime<Utc>) -> Self {
        let iso = |dt: DateTime<Utc>| dt.to_rfc3339_opts(SecondsFormat::Millis, true);

        let month_ago = now
            .checked_sub_months(Months::new(1))
            .and_then(|dt| dt.date_naive().and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
            .unwrap_or(now);
        let year_start = NaiveDate::from_ymd_opt(now.year(), 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
            .unwrap_or(now);
        let quarter_end = year_start
            .checked_add_months(Months::new(3))
            .unwrap_or(year_start);

        Self {
            now: iso(now),
            month_ago: iso(month_ago),
            year_start: iso(year_start),
            quarter_end: iso(quarter_end),
        }
    }
}

/// Full extraction prompt for one axis, ending with the user's request
pub fn extraction_prompt(axis: Axis, lang: Lang, question: &str, now: DateTime<Utc>) -> String {
    let dates = ExampleDates::new(now);
    let few_shots = match (axis, lang) {
        (Axis::Dates, Lang::En) => dates_en(&dates),
        (Axis::Dates, Lang::Fr) => dates_fr(&dates),
        (Axis::Subject, Lang::En) => subject_en(&dates),
        (Axis::Subject, Lang::Fr) => subject_fr(&dates),
        (Axis::Question, Lang::En) => question_en(&dates),
        (Axis::Question, Lang::Fr) => question_fr(&dates),
        (Axis::Senders, Lang::En) => senders_en(&dates),
        (Axis::Senders, Lang::Fr) => senders_fr(&dates),
    };
    let label = match lang {
        Lang::En => "Request",
        Lang::Fr => "Demande",
    };
    format!("{few_shots}\n\n{label}:\n\"\"\"\n{question}\n\"\"\"")
}

fn dates_en(d: &ExampleDates) -> String {
    format!(
        r#"Today is {now}
You are a data analyst. Providing a user request, you have to find a date range to filter some emails that may contain information about the request.
Start by explaining what the request is about and write the dates in ISO8601 format. If you can't produce any date just write null.

Request:
"""
What Emilie is doing for the Sthack event?
"""
This request is about a person named Emilie and an event named Sthack. There is no specific hint about a potential date of the event so we can't filter emails by date.
{{"startingDate": null, "endingDate": null}}

Request:
"""
Quel est le status de la commande de T-shirt que j'ai passé il y a 1 mois?
"""
This request is about a T-Shirt order the user made 1 month ago. The user specified a time relative information so we can filter emails by date received since 1 month.
{{"startingDate": "{month_ago}", "endingDate": null}}

Request:
"""
What was the price we negotiated with Damien in Q1?
"""
This request is about a negotiation between the user and Damien regarding a price. We don't know the price of what but we know it was done in the first quarter of this year.
{{"startingDate": "{year_start}", "endingDate": "{quarter_end}"}}"#,
        now = d.now,
        month_ago = d.month_ago,
        year_start = d.year_start,
        quarter_end = d.quarter_end,
    )
}

fn dates_fr(d: &ExampleDates) -> String {
    format!(
        r#"Aujourd'hui, nous sommes le {now}
Vous êtes un analyste de données. Suite à une demande d'utilisateur, vous devez trouver une plage de dates pour filtrer des e-mails qui pourraient contenir des informations sur la demande.
Commencez par expliquer de quoi parle la demande et écrivez les dates au format ISO8601. Si vous ne pouvez pas produire de date, écrivez simplement null.

Demande:
"""
Que fait Emilie pour la Sthack?
"""
Cette demande concerne une personne nommée Emilie et un événement appelé Sthack. Il n'y a pas d'indice spécifique sur une date potentielle de l'événement, donc nous ne pouvons pas filtrer les e-mails par date.
{{"startingDate": null, "endingDate": null}}

Demande:
"""
Quel est le status de la commande de T-shirt que j'ai passé il y a 1 mois?
"""
Cette demande concerne une commande de T-Shirt que l'utilisateur a passé il y a 1 mois. L'utilisateur a spécifié une information temporelle relative, donc nous pouvons filtrer les e-mails par date de réception depuis 1 mois.
{{"startingDate": "{month_ago}", "endingDate": null}}

Demande:
"""
Quel était le prix que l'on a négocié avec Damien en Q1?
"""
Cette demande concerne une négociation entre l'utilisateur et Damien concernant un prix. Nous ne connaissons pas le prix de quoi, mais nous savons que cela a été fait au premier trimestre de cette année.
{{"startingDate": "{year_start}", "endingDate": "{quarter_end}"}}"#,
        now = d.now,
        month_ago = d.month_ago,
        year_start = d.year_start,
        quarter_end = d.quarter_end,
    )
}

fn subject_en(d: &ExampleDates) -> String {
    format!(
        r#"Today is {now}
You are a data analyst. Providing a user request, you have to find a subject to filter some emails that may contain information about the request.
Start by explaining what the request is about and write the potential subjects.

Request:
"""
What Emilie is doing for the Sthack event?
"""
This request is about a person named Emilie and an event named Sthack. Probable email with subjects "Sthack", "event" or "Emilie" could contain information about the user request
{{"subject": "Sthack event Emilie"}}

Request:
"""
Quel est le status de la commande de T-shirt que j'ai passé il y a 1 mois?
"""
This request is about a T-Shirt order the user made 1 month ago. Email with subjects containing "T-Shirt", "status", "commande" could match.
{{"subject": "T-Shirt status commande"}}

Request:
"""
What was the price we negotiated with Damien in Q1?
"""
This request is about a negotiation between the user and Damien regarding a price. Interesting email subject may contain the words "price", "negotiation", "Damien" and or "Q1".
{{"subject": "price negotiation Damien Q1"}}

Request:
"""
Peux-tu générer une réponse à l'email que j'ai reçu de la banque il y a 2 semaines?
"""
This request is about generating a response to an email the user received from a bank 2 weeks ago. To generate the response, email with subject containing "banque" should be retrieved.
{{"subject": "banque"}}

Request:
"""
I've a flat tire and need to follow-up with the insurance company. Can you retrieve the contract number of my insurance company?
"""
This request is about getting the contract number of the user's insurance company. Email with subject containing "insurance" or "contract number" may be relevant to the user's request.
{{"subject": "insurance contract number"}}"#,
        now = d.now,
    )
}

fn subject_fr(d: &ExampleDates) -> String {
    format!(
        r#"Aujourd'hui, nous sommes le {now}
Vous êtes un analyste de données. Suite à une demande d'utilisateur, vous devez trouver un sujet pour filtrer des e-mails qui pourraient contenir des informations concernant la demande.
Commencez par expliquer de quoi parle la demande et écrivez les sujets potentiels.

Demande:
"""
Que fait Emilie pour la Sthack?
"""
Cette demande concerne une personne nommée Emilie et un événement nommé Sthack. Un e-mail probable avec les sujets "Sthack", "événement" ou "Emilie" pourrait contenir des informations sur la demande de l'utilisateur.
{{"subject": "Sthack événement Emilie"}}

Demande:
"""
Quel est le status de la commande de T-shirt que j'ai passé il y a 1 mois?
"""
Cette demande concerne une commande de T-Shirt que l'utilisateur a passée il y a 1 mois. Les e-mails avec des sujets contenant "T-Shirt", "statut", "commande" pourraient correspondre.
{{"subject": "T-Shirt statut commande"}}

Demande:
"""
Quel était le prix que l'on a négocié avec Damien en Q1?
"""
Cette demande concerne une négociation entre l'utilisateur et Damien concernant un prix. Les sujets d'e-mails intéressants peuvent contenir les mots "prix", "négociation", "Damien" et/ou "Q1".
{{"subject": "prix négociation Damien Q1"}}

Demande:
"""
Peux-tu générer une réponse à l'email que j'ai reçu de la banque il y a 2 semaines?
"""
Cette demande concerne la génération d'une réponse à un e-mail reçu par l'utilisateur d'une banque il y a 2 semaines. Pour générer la réponse, un e-mail avec un sujet contenant "banque" doit être récupéré.
{{"subject": "banque"}}

Demande:
"""
J'ai un pneu crevé et besoin de faire un suivi auprès de la compagnie d'assurance. Peux-tu me trouver le numéro de contrat de ma compagnie d'assurance ?
"""
Cette demande concerne l'obtention du numéro de contrat de la compagnie d'assurance de l'utilisateur. Les e-mails avec des sujets contenant "assurance" ou "numéro de contrat" peuvent être pertinents pour la demande de l'utilisateur.
{{"subject": "numéro contrat assurance"}}"#,
        now = d.now,
    )
}

fn question_en(d: &ExampleDates) -> String {
    format!(
        r#"Today is {now}
You are a data analyst. Providing a user request, you have to summarize it into a question to search for information in the emails database.
Start by explaining what the request is about and write the related question. If no relevant question can be produced, then write null.

Request:
"""
What Emilie is doing for the Sthack event?
"""
This request is about a person named Emilie and an event named Sthack.
{{"question": "What Emilie is doing for the Sthack event?"}}

Request:
"""
Quel est le status de la commande de T-shirt que j'ai passé il y a 1 mois?
"""
This request is about a T-Shirt order the user made 1 month ago.
{{"question": "Quel est le status de la commande de T-shirt ?"}}

Request:
"""
What was the price we negotiated with Damien in Q1?
"""
This request is about a negotiation between the user and Damien regarding a price.
{{"question": "What was the price we negotiated?"}}

Request:
"""
Peux-tu générer une réponse à l'email que j'ai reçu de la banque il y a 2 semaines?
"""
This request is about generating a response to an email the user received from a bank 2 weeks ago.
{{"question": null}}

Request:
"""
I've a flat tire and need to follow-up with the insurance company. Can you retrieve the contract number of my insurance company?
"""
This request is about getting the contract number of the user's insurance company to find a solution for a flat tire.
{{"question": "What's the contract number of my insurance company?"}}"#,
        now = d.now,
    )
}

fn question_fr(d: &ExampleDates) -> String {
    format!(
        r#"Aujourd'hui, nous sommes le {now}.
Vous êtes analyste de données. Lorsqu'on vous fournit une demande d'utilisateur, vous devez la résumer en une question pour rechercher des informations dans la base de données des e-mails.
Commencez par expliquer de quoi parle la demande et écrivez la question associée. Si aucune question pertinente ne peut être produite, écrivez null.

Demande:
"""
Que fait Emilie pour la Sthack?
"""
Cette demande concerne une personne nommée Emilie et un événement appelé Sthack.
{{"question": "Que fait Emilie pour la Sthack?"}}

Demande:
"""
Quel est le status de la commande de T-shirt que j'ai passé il y a 1 mois?
"""
Cette demande concerne une commande de T-shirt faite par l'utilisateur il y a 1 mois.
{{"question": "Quel est le status de la commande de T-shirt ?"}}

Demande:
"""
Quel était le prix que l'on a négocié avec Damien en Q1?
"""
Cette demande concerne une négociation entre l'utilisateur et Damien concernant un prix.
{{"question": "Quel était le prix négocié ?"}}

Demande:
"""
Peux-tu générer une réponse à l'email que j'ai reçu de la banque il y a 2 semaines?
"""
Cette demande concerne la génération d'une réponse à un e-mail que l'utilisateur a reçu d'une banque il y a 2 semaines.
{{"question": null}}

Demande:
"""
J'ai un pneu crevé et besoin de faire un suivi auprès de la compagnie d'assurance. Peux-tu me trouver le numéro de contrat de ma compagnie d'assurance ?
"""
Cette demande concerne l'obtention du numéro de contrat de la compagnie d'assurance de l'utilisateur pour trouver une solution à un pneu crevé.
{{"question": "Quel est le numéro de contrat de ma compagnie d'assurance ?"}}"#,
        now = d.now,
    )
}

fn senders_en(d: &ExampleDates) -> String {
    format!(
        r#"Today is {now}
You are a data analyst. Providing a user request, you have to find a sender to filter some emails that may contain information about the request.
Start by explaining what the request is about and write the potential senders. If you can't find any sender, write null.

Request:
"""
What Emilie is doing for the Sthack event?
"""
This request is about a person named Emilie and an event named Sthack. Probable senders are "emilie" or "sthack".
{{"senders": ["emilie", "sthack"]}}

Request:
"""
Quel est le status de la commande de T-shirt que j'ai passé il y a 1 mois?
"""
This request is about a T-Shirt order the user made 1 month ago. There is no hint about a potential sender.
{{"senders": null}}

Request:
"""
What was the price we negotiated with Damien in Q1?
"""
This request is about a negotiation between the user and Damien regarding a price. The emails are probably sent by Damien.
{{"senders": ["damien"]}}

Request:
"""
Peux-tu générer une réponse à l'email que j'ai reçu de la banque il y a 2 semaines?
"""
This request is about generating a response to an email the user received from a bank 2 weeks ago. Sender may have the word "banque" in the domain name of their email address.
{{"senders": ["banque"]}}

Request:
"""
I've a flat tire and need to follow-up with the insurance company. Can you retrieve the contract number of my insurance company?
"""
This request is about getting the contract number of the user's insurance company. There is no hint about the insurance company name.
{{"senders": null}}"#,
        now = d.now,
    )
}

fn senders_fr(d: &ExampleDates) -> String {
    format!(
        r#"Aujourd'hui, nous sommes le {now}
Vous êtes un analyste de données. Suite à une demande d'utilisateur, vous devez trouver un expéditeur pour filtrer certains e-mails qui peuvent contenir des informations sur la demande.
Commencez par expliquer de quoi parle la demande et écrivez les expéditeurs potentiels. Si vous ne trouvez aucun expéditeur, écrivez null.

Demande:
"""
Que fait Emilie pour la Sthack?
"""
Cette demande concerne une personne nommée Emilie et un événement appelé Sthack. Les expéditeurs probables sont "emilie" ou "sthack".
{{"senders": ["emilie", "sthack"]}}

Demande:
"""
Quel est le status de la commande de T-shirt que j'ai passé il y a 1 mois?
"""
Cette demande concerne une commande de T-shirt que l'utilisateur a passée il y a 1 mois. Il n'y a pas d'indice sur un éventuel expéditeur.
{{"senders": null}}

Demande:
"""
Quel était le prix que l'on a négocié avec Damien en Q1?
"""
Cette demande concerne une négociation entre l'utilisateur et Damien concernant un prix. Les emails sont probablement envoyés par Damien.
{{"senders": ["damien"]}}

Demande:
"""
Peux-tu générer une réponse à l'email que j'ai reçu de la banque il y a 2 semaines?
"""
Cette demande concerne la génération d'une réponse à un email que l'utilisateur a reçu d'une banque il y a 2 semaines. L'expéditeur peut avoir le mot "banque" dans le nom de domaine de son adresse e-mail.
{{"senders": ["banque"]}}

Demande:
"""
J'ai un pneu crevé et besoin de faire un suivi auprès de la compagnie d'assurance. Peux-tu me trouver le numéro de contrat de ma compagnie d'assurance ?
"""
Cette demande concerne l'obtention du numéro de contrat de la compagnie d'assurance de l'utilisateur. Il n'y a pas d'indice sur le nom de la compagnie d'assurance.
{{"senders": null}}"#,
        now = d.now,
    )
}

/// System instructions for answer generation
pub fn answer_system_prompt(lang: Lang, display_name: &str, email_address: Option<&str>) -> String {
    let who = match email_address {
        Some(address) => format!("{display_name} <{address}>"),
        None => display_name.to_string(),
    };
    match lang {
        Lang::En => format!(
            "You are the personal email assistant of {who}.\n\
             You have a list of emails that may contain the answer to {display_name}'s question.\n\
             Your goal is to read these emails and then answer {display_name} as well as you can."
        ),
        Lang::Fr => format!(
            "Tu es l'assistant personnel des emails de {who}.\n\
             Tu as une liste d'emails pouvant contenir la réponse à la question de {display_name}.\n\
             Ton but est de lire ces emails puis de répondre à {display_name} du mieux que tu peux."
        ),
    }
}

/// Opening user message of a conversation, carrying identity and date
pub fn first_turn_message(
    lang: Lang,
    display_name: &str,
    email_address: Option<&str>,
    now: DateTime<Utc>,
    question: &str,
) -> String {
    let who = match email_address {
        Some(address) => format!("{display_name} <{address}>"),
        None => display_name.to_string(),
    };
    let date = now.to_rfc3339_opts(SecondsFormat::Secs, true);
    match lang {
        Lang::En => format!("I am {who}, today is {date}.\n{question}"),
        Lang::Fr => format!("Je suis {who}, nous sommes le {date}.\n{question}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_example_dates_are_anchored_on_now() {
        let now = Utc.with_ymd_and_hms(2024, 5, 17, 14, 30, 0).unwrap();
        let prompt = extraction_prompt(Axis::Dates, Lang::En, "anything", now);

        assert!(prompt.starts_with("Today is 2024-05-17T14:30:00.000Z"));
        assert!(prompt.contains(r#"{"startingDate": "2024-04-17T00:00:00.000Z", "endingDate": null}"#));
        assert!(prompt.contains(
            r#"{"startingDate": "2024-01-01T00:00:00.000Z", "endingDate": "2024-04-01T00:00:00.000Z"}"#
        ));
    }

    #[test]
    fn test_prompt_ends_with_request() {
        let now = Utc::now();
        let prompt = extraction_prompt(Axis::Senders, Lang::Fr, "Que dit Damien ?", now);
        assert!(prompt.ends_with("Demande:\n\"\"\"\nQue dit Damien ?\n\"\"\""));
        assert!(prompt.contains("trouver un expéditeur"));
    }

    #[test]
    fn test_each_axis_has_distinct_prompt() {
        let now = Utc::now();
        let axes = [Axis::Dates, Axis::Subject, Axis::Question, Axis::Senders];
        for lang in [Lang::En, Lang::Fr] {
            let prompts: Vec<_> = axes
                .iter()
                .map(|axis| extraction_prompt(*axis, lang, "q", now))
                .collect();
            for (i, a) in prompts.iter().enumerate() {
                for b in prompts.iter().skip(i + 1) {
                    assert_ne!(a, b);
                }
            }
        }
    }

    #[test]
    fn test_first_turn_message() {
        let now = Utc.with_ymd_and_hms(2024, 5, 17, 0, 0, 0).unwrap();
        let message = first_turn_message(Lang::En, "Alex", Some("alex@example.com"), now, "Hi?");
        assert_eq!(message, "I am Alex <alex@example.com>, today is 2024-05-17T00:00:00Z.\nHi?");
    }
}
